//! Compilation units
//!
//! A module owns the types and functions its source declares, a data
//! section of named slots for module-level variables, and an `init`
//! function that constructs those slots. Slot offsets are stable for the
//! module lifetime; contents are constructed exactly once during `init`
//! and destroyed at module teardown.

use parking_lot::Mutex;

use crate::lexer::SourceSpan;
use crate::types::{FunctionId, ModuleId, TypeId};

/// Metadata of one named slot in a module's data section
#[derive(Debug, Clone)]
pub struct DataSlot {
    /// Declared name
    pub name: String,
    /// Static type of the stored value
    pub type_id: TypeId,
    /// Byte offset inside the module's data section
    pub offset: u32,
    /// Byte size of the slot
    pub size: u32,
    /// Declaration site
    pub span: SourceSpan,
}

/// A unit of compilation.
#[derive(Debug)]
pub struct Module {
    /// Id derived from the source path hash
    pub id: ModuleId,
    /// Module name (file stem)
    pub name: String,
    /// Source path the module was compiled from
    pub path: String,
    /// Types declared by this module
    pub types: Vec<TypeId>,
    /// Functions declared by this module
    pub functions: Vec<FunctionId>,
    /// Generated module initializer
    pub init_function: Option<FunctionId>,
    /// Modules imported by this one
    pub imports: Vec<ModuleId>,
    data: Vec<DataSlot>,
    data_size: u32,
    init_state: Mutex<bool>,
}

impl Module {
    /// New empty module for a source path.
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            id: crate::types::module_id_from_path(path),
            name: name.to_string(),
            path: path.to_string(),
            types: Vec::new(),
            functions: Vec::new(),
            init_function: None,
            imports: Vec::new(),
            data: Vec::new(),
            data_size: 0,
            init_state: Mutex::new(false),
        }
    }

    /// Reserve a named slot in the data section and return its index.
    ///
    /// Slots are 8-byte aligned. The offset never changes once assigned.
    pub fn define_local(&mut self, name: &str, type_id: TypeId, size: u32, span: SourceSpan) -> u32 {
        let offset = self.data_size;
        let aligned = size.max(1).div_ceil(8) * 8;
        self.data_size += aligned;
        self.data.push(DataSlot {
            name: name.to_string(),
            type_id,
            offset,
            size,
            span,
        });
        (self.data.len() - 1) as u32
    }

    /// Metadata of a data slot.
    pub fn data_info(&self, slot: u32) -> Option<&DataSlot> {
        self.data.get(slot as usize)
    }

    /// Find a data slot by name.
    pub fn find_data(&self, name: &str) -> Option<(u32, &DataSlot)> {
        self.data
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == name)
            .map(|(i, s)| (i as u32, s))
    }

    /// All data slots in declaration order.
    pub fn data_slots(&self) -> &[DataSlot] {
        &self.data
    }

    /// Total byte size of the data section.
    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    /// Mark the module initialized, returning whether this caller should
    /// run the init function. The lock makes init idempotent and
    /// race-free; callers holding `false` must not re-run initializers.
    pub fn begin_init(&self) -> bool {
        let mut state = self.init_state.lock();
        if *state {
            false
        } else {
            *state = true;
            true
        }
    }

    /// Whether `init` has already run.
    pub fn is_initialized(&self) -> bool {
        *self.init_state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::type_id_from_name;

    #[test]
    fn slot_offsets_are_stable_and_aligned() {
        let mut m = Module::new("m", "m.tsn");
        let tp = type_id_from_name("i32");
        let a = m.define_local("a", tp, 4, SourceSpan::default());
        let b = m.define_local("b", tp, 12, SourceSpan::default());
        let c = m.define_local("c", tp, 8, SourceSpan::default());
        assert_eq!(m.data_info(a).unwrap().offset, 0);
        assert_eq!(m.data_info(b).unwrap().offset, 8);
        assert_eq!(m.data_info(c).unwrap().offset, 24);
        assert_eq!(m.data_size(), 32);
    }

    #[test]
    fn begin_init_runs_once() {
        let m = Module::new("m", "m.tsn");
        assert!(m.begin_init());
        assert!(!m.begin_init());
        assert!(m.is_initialized());
    }
}
