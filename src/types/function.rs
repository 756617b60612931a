//! Function records

use std::sync::Arc;

use crate::compiler::intrinsics::IntrinsicFn;
use crate::ffi::thunk::Thunk;
use crate::types::{AccessModifier, FunctionId, ModuleId, TypeId};

/// Behavioral flags of a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    /// Method exposed from a static native function whose first
    /// parameter is the receiver
    pub is_static_method: bool,
    /// The returned pointer is guaranteed non-null
    pub return_pointer_non_nullable: bool,
}

/// How a function executes when called
#[derive(Clone)]
pub enum FunctionImpl {
    /// Bound host callable invoked through its thunk
    Host(Thunk),
    /// Script function; entry address filled in when the owning module's
    /// code is installed into the backend
    Script {
        /// Instruction address of the entry point, if installed
        entry: Option<u32>,
    },
    /// Expands to IR at the call site instead of emitting a call
    Intrinsic(IntrinsicFn),
}

impl std::fmt::Debug for FunctionImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionImpl::Host(_) => f.write_str("Host(..)"),
            FunctionImpl::Script { entry } => f.debug_struct("Script").field("entry", entry).finish(),
            FunctionImpl::Intrinsic(_) => f.write_str("Intrinsic(..)"),
        }
    }
}

/// A registered function. Immutable once added to the registry, except
/// for the script entry address which is resolved at install time.
#[derive(Debug, Clone)]
pub struct Function {
    /// Registry-assigned 32-bit id
    pub id: FunctionId,
    /// Short name
    pub name: String,
    /// Fully qualified name
    pub fully_qualified_name: String,
    /// Signature type id (a function type in the type registry)
    pub signature: TypeId,
    /// Access control
    pub access: AccessModifier,
    /// Owning module, if any
    pub module: Option<ModuleId>,
    /// Takes an implicit `this`
    pub is_method: bool,
    /// Flags
    pub flags: FunctionFlags,
    /// Execution strategy
    pub body: FunctionImpl,
}

impl Function {
    /// Host function backed by a thunk.
    pub fn host(
        name: &str,
        fully_qualified_name: &str,
        signature: TypeId,
        thunk: Thunk,
        is_method: bool,
    ) -> Self {
        Self {
            id: FunctionId(0),
            name: name.to_string(),
            fully_qualified_name: fully_qualified_name.to_string(),
            signature,
            access: AccessModifier::Public,
            module: None,
            is_method,
            flags: FunctionFlags::default(),
            body: FunctionImpl::Host(thunk),
        }
    }

    /// Script function whose entry is resolved later.
    pub fn script(
        name: &str,
        fully_qualified_name: &str,
        signature: TypeId,
        module: ModuleId,
        is_method: bool,
    ) -> Self {
        Self {
            id: FunctionId(0),
            name: name.to_string(),
            fully_qualified_name: fully_qualified_name.to_string(),
            signature,
            access: AccessModifier::Public,
            module: Some(module),
            is_method,
            flags: FunctionFlags::default(),
            body: FunctionImpl::Script { entry: None },
        }
    }

    /// Intrinsic function that expands to IR at its call sites.
    pub fn intrinsic(
        name: &str,
        fully_qualified_name: &str,
        signature: TypeId,
        gen: IntrinsicFn,
        is_method: bool,
    ) -> Self {
        Self {
            id: FunctionId(0),
            name: name.to_string(),
            fully_qualified_name: fully_qualified_name.to_string(),
            signature,
            access: AccessModifier::Public,
            module: None,
            is_method,
            flags: FunctionFlags::default(),
            body: FunctionImpl::Intrinsic(gen),
        }
    }

    /// The bound thunk, if this is a host function.
    pub fn thunk(&self) -> Option<&Thunk> {
        match &self.body {
            FunctionImpl::Host(t) => Some(t),
            _ => None,
        }
    }

    /// The intrinsic expansion callback, if any.
    pub fn intrinsic_fn(&self) -> Option<IntrinsicFn> {
        match &self.body {
            FunctionImpl::Intrinsic(g) => Some(Arc::clone(g)),
            _ => None,
        }
    }

    /// Script entry address, if installed.
    pub fn entry(&self) -> Option<u32> {
        match &self.body {
            FunctionImpl::Script { entry } => *entry,
            _ => None,
        }
    }

    /// Whether the function runs host code.
    pub fn is_host(&self) -> bool {
        matches!(self.body, FunctionImpl::Host(_))
    }
}
