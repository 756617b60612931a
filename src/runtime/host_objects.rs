//! Host object storage and the script heap
//!
//! Host-bound objects never live inside VM memory: they sit in a slab
//! on the host side and scripts hold opaque 64-bit handles to them.
//! Bound methods resolve the handle back to the Rust value. Script-side
//! aggregates (classes declared in script) live in VM memory; their
//! heap storage comes from the bump-and-reuse allocator below.

use std::any::Any;

use crate::error::RuntimeError;

/// Slab of live host objects addressed by opaque handles.
///
/// Handle 0 is reserved as null. Handles are generation-free: a stale
/// handle to a freed slot reads as invalid because the slot is empty.
#[derive(Default)]
pub struct HostObjects {
    slots: Vec<Option<Box<dyn Any + Send>>>,
    free: Vec<usize>,
    live: usize,
}

impl std::fmt::Debug for HostObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostObjects").field("live", &self.live).finish()
    }
}

impl HostObjects {
    /// Empty slab.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Store an object, returning its handle.
    pub fn insert<T: Send + 'static>(&mut self, value: T) -> u64 {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(Box::new(value));
            (idx as u64) + 1
        } else {
            self.slots.push(Some(Box::new(value)));
            self.slots.len() as u64
        }
    }

    fn slot(&self, handle: u64) -> Result<usize, RuntimeError> {
        let idx = handle
            .checked_sub(1)
            .ok_or(RuntimeError::InvalidHandle { handle })? as usize;
        if idx >= self.slots.len() || self.slots[idx].is_none() {
            return Err(RuntimeError::InvalidHandle { handle });
        }
        Ok(idx)
    }

    /// Borrow an object.
    pub fn get<T: 'static>(&self, handle: u64) -> Result<&T, RuntimeError> {
        let idx = self.slot(handle)?;
        self.slots[idx]
            .as_ref()
            .and_then(|b| b.downcast_ref::<T>())
            .ok_or(RuntimeError::InvalidHandle { handle })
    }

    /// Borrow an object mutably.
    pub fn get_mut<T: 'static>(&mut self, handle: u64) -> Result<&mut T, RuntimeError> {
        let idx = self.slot(handle)?;
        self.slots[idx]
            .as_mut()
            .and_then(|b| b.downcast_mut::<T>())
            .ok_or(RuntimeError::InvalidHandle { handle })
    }

    /// Drop an object. Runs the value's `Drop`.
    pub fn remove(&mut self, handle: u64) -> Result<(), RuntimeError> {
        let idx = self.slot(handle)?;
        self.slots[idx] = None;
        self.free.push(idx);
        self.live -= 1;
        Ok(())
    }
}

/// Script heap allocator over the tail region of VM memory.
///
/// Grows downward from the end of memory toward the module data
/// sections. Freed blocks of a matching size are reused; a grown
/// reallocation always returns fresh memory.
#[derive(Debug)]
pub struct Heap {
    next: u64,
    floor: u64,
    free: Vec<(u64, u64)>,
    /// addr -> size of live blocks
    live: std::collections::HashMap<u64, u64>,
}

impl Heap {
    /// Heap spanning `[floor, end)`.
    pub fn new(floor: u64, end: u64) -> Self {
        Self {
            next: end,
            floor,
            free: Vec::new(),
            live: std::collections::HashMap::new(),
        }
    }

    /// Raise the floor when module data sections grow.
    pub fn set_floor(&mut self, floor: u64) {
        self.floor = floor;
    }

    /// Allocate `size` bytes, 8-aligned.
    pub fn alloc(&mut self, size: u64) -> Result<u64, RuntimeError> {
        let size = size.max(1).div_ceil(8) * 8;
        if let Some(pos) = self.free.iter().position(|(s, _)| *s == size) {
            let (_, addr) = self.free.swap_remove(pos);
            self.live.insert(addr, size);
            return Ok(addr);
        }
        let addr = self
            .next
            .checked_sub(size)
            .ok_or(RuntimeError::MemoryOutOfRange {
                address: 0,
                size: size as u32,
            })?;
        if addr < self.floor {
            return Err(RuntimeError::MemoryOutOfRange {
                address: addr,
                size: size as u32,
            });
        }
        self.next = addr;
        self.live.insert(addr, size);
        Ok(addr)
    }

    /// Release a block.
    pub fn free(&mut self, addr: u64) -> Result<(), RuntimeError> {
        let size = self
            .live
            .remove(&addr)
            .ok_or(RuntimeError::InvalidHandle { handle: addr })?;
        self.free.push((size, addr));
        Ok(())
    }

    /// Number of live blocks, for leak assertions in tests.
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_roundtrip_and_drop() {
        struct Probe(std::sync::Arc<std::sync::atomic::AtomicI32>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let counter = std::sync::Arc::new(std::sync::atomic::AtomicI32::new(1));
        let mut objs = HostObjects::new();
        let h = objs.insert(Probe(std::sync::Arc::clone(&counter)));
        assert!(objs.get::<Probe>(h).is_ok());
        assert_eq!(objs.live_count(), 1);
        objs.remove(h).unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(objs.get::<Probe>(h).is_err());
    }

    #[test]
    fn null_handle_is_invalid() {
        let objs = HostObjects::new();
        assert!(objs.get::<i32>(0).is_err());
    }

    #[test]
    fn heap_reuses_freed_blocks_of_same_size() {
        let mut h = Heap::new(0, 4096);
        let a = h.alloc(16).unwrap();
        h.free(a).unwrap();
        let b = h.alloc(16).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn heap_respects_floor() {
        let mut h = Heap::new(4000, 4096);
        assert!(h.alloc(64).is_ok());
        assert!(h.alloc(64).is_err());
    }
}
