//! Type and function registries
//!
//! Both registries are single-writer at compile time and many-reader at
//! runtime; the [`crate::Runtime`] wraps them in `parking_lot::RwLock`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BindError, Result};
use crate::types::data_type::signature_equivalent;
use crate::types::{DataType, Function, FunctionId, FunctionSignature, TypeId, TypeKind};

/// Interns data types and indexes them by stable id.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, Arc<DataType>>,
    /// Host Rust type name -> script type id, recorded at bind time
    host_map: HashMap<String, TypeId>,
    /// Ids registered as non-owning references (template machinery)
    foreign: Vec<TypeId>,
    /// Mirror of the function table used to resolve method ids during
    /// equivalence checks. Kept in sync by the runtime after function
    /// registration.
    pub(crate) functions: Option<HashMap<FunctionId, Arc<Function>>>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry holds no types.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Look up a type by id.
    pub fn get(&self, id: TypeId) -> Option<Arc<DataType>> {
        self.types.get(&id).cloned()
    }

    /// Look up the script type bound for a host Rust type.
    pub fn get_host<T: 'static>(&self) -> Option<Arc<DataType>> {
        let key = std::any::type_name::<T>();
        self.host_map.get(key).and_then(|id| self.get(*id))
    }

    /// Id of the script type bound for a host Rust type.
    pub fn host_type_id<T: 'static>(&self) -> Option<TypeId> {
        self.host_map.get(std::any::type_name::<T>()).copied()
    }

    /// Id recorded for an explicit host key (a Rust type name or a
    /// builtin's script name).
    pub fn host_id_by_key(&self, key: &str) -> Option<TypeId> {
        self.host_map.get(key).copied()
    }

    /// Register a type. Fails if a different type already owns the id.
    pub fn add(&mut self, tp: DataType) -> Result<Arc<DataType>> {
        if let Some(existing) = self.types.get(&tp.id) {
            // Re-adding an identical signature type is a no-op; anything
            // else is a name collision.
            if existing.meta.is_function && tp.meta.is_function {
                return Ok(Arc::clone(existing));
            }
            return Err(BindError::TypeAlreadyBound {
                type_name: tp.fully_qualified_name.clone(),
            }
            .into());
        }
        let arc = Arc::new(tp);
        self.types.insert(arc.id, Arc::clone(&arc));
        Ok(arc)
    }

    /// Register a type the registry does not own (used when templates
    /// publish specializations that belong to another module).
    pub fn add_foreign(&mut self, tp: Arc<DataType>) {
        self.foreign.push(tp.id);
        self.types.entry(tp.id).or_insert(tp);
    }

    /// Replace a type in place, keeping its id. Used while a class
    /// declaration accumulates its method table.
    pub fn replace(&mut self, tp: DataType) -> Arc<DataType> {
        let arc = Arc::new(tp);
        self.types.insert(arc.id, Arc::clone(&arc));
        arc
    }

    /// Record the host Rust type name for a bound type.
    pub fn map_host<T: 'static>(&mut self, id: TypeId) {
        self.host_map.insert(std::any::type_name::<T>().to_string(), id);
    }

    /// Record a host mapping by explicit stable name.
    pub fn map_host_named(&mut self, stable_name: &str, id: TypeId) {
        self.host_map.insert(stable_name.to_string(), id);
    }

    /// Iterate over all live types.
    pub fn all(&self) -> impl Iterator<Item = &Arc<DataType>> {
        self.types.values()
    }

    /// Find an existing function type structurally equivalent to `sig`.
    ///
    /// Used by lowering before creating a new signature object so that
    /// structurally identical signatures share one id.
    pub fn find_equivalent_signature(&self, sig: &FunctionSignature) -> Option<Arc<DataType>> {
        for tp in self.types.values() {
            if !tp.meta.is_function {
                continue;
            }
            if let TypeKind::Function(existing) = &tp.kind {
                if signature_equivalent(existing, sig, self) {
                    return Some(Arc::clone(tp));
                }
            }
        }
        None
    }

    /// Intern a signature: reuse a structurally equivalent function type
    /// if one exists, otherwise register a new one.
    pub fn intern_signature(&mut self, sig: FunctionSignature) -> Arc<DataType> {
        if let Some(existing) = self.find_equivalent_signature(&sig) {
            return existing;
        }
        let tp = Arc::new(DataType::function(sig));
        self.types.insert(tp.id, Arc::clone(&tp));
        tp
    }

    /// Function lookup helper used by the equivalence relation.
    pub(crate) fn function(&self, id: FunctionId) -> Option<Arc<Function>> {
        self.functions.as_ref()?.get(&id).cloned()
    }

    /// Refresh the function mirror after new functions are registered,
    /// so equivalence checks can resolve method ids.
    pub fn sync_functions(&mut self, table: HashMap<FunctionId, Arc<Function>>) {
        self.functions = Some(table);
    }
}

/// Interns functions and assigns 32-bit ids.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionId, Arc<Function>>,
    next_id: u32,
}

impl FunctionRegistry {
    /// Empty registry. Id 0 is reserved as "no function".
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Look up a function by id.
    pub fn get(&self, id: FunctionId) -> Option<Arc<Function>> {
        self.functions.get(&id).cloned()
    }

    /// Register a function, assigning it a fresh id. The returned record
    /// is immutable.
    pub fn add(&mut self, mut func: Function) -> Arc<Function> {
        let id = FunctionId(self.next_id);
        self.next_id += 1;
        func.id = id;
        let arc = Arc::new(func);
        self.functions.insert(id, Arc::clone(&arc));
        arc
    }

    /// Replace a script function's record after its entry address is
    /// resolved. Only the entry address may change.
    pub(crate) fn install_entry(&mut self, id: FunctionId, entry: u32) {
        if let Some(existing) = self.functions.get(&id) {
            let mut updated = (**existing).clone();
            if let crate::types::FunctionImpl::Script { entry: e } = &mut updated.body {
                *e = Some(entry);
            }
            self.functions.insert(id, Arc::new(updated));
        }
    }

    /// Iterate over all registered functions.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Function>> {
        self.functions.values()
    }

    /// Snapshot of the table, used to mirror into the type registry for
    /// method resolution during equivalence checks.
    pub fn snapshot(&self) -> HashMap<FunctionId, Arc<Function>> {
        self.functions.clone()
    }
}
