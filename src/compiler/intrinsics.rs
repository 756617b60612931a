//! Inline code generation
//!
//! A bound method or property may expand directly to IR at its call
//! sites instead of emitting a call. Generic containers are built this
//! way: each operation is a callback that receives the current function
//! builder, the resolved receiver/arguments and the destination
//! storage, and emits whatever IR it needs.

use std::sync::Arc;

use crate::compiler::func_def::FunctionDef;
use crate::compiler::ir::{Opcode, Value};
use crate::error::Result;
use crate::types::{FunctionRegistry, ModuleId, TypeId, TypeRegistry};

/// Everything an intrinsic expansion may touch.
pub struct IntrinsicCall<'a> {
    /// Builder of the function being lowered
    pub func: &'a mut FunctionDef,
    /// Type registry, for size and layout queries
    pub types: &'a TypeRegistry,
    /// Resolved receiver, for method intrinsics
    pub this: Option<Value>,
    /// Resolved explicit arguments
    pub args: Vec<Value>,
    /// Destination storage chosen by the caller, if the context needs
    /// the result placed somewhere specific
    pub dst: Option<Value>,
    /// Declared result type
    pub ret_type: TypeId,
}

/// An intrinsic expansion callback; returns the value holding the
/// result of the operation.
pub type IntrinsicFn = Arc<dyn Fn(&mut IntrinsicCall<'_>) -> Result<Value> + Send + Sync>;

/// Context handed to template specializers.
pub struct SpecializeCtx<'a> {
    /// Type registry to intern the specialization into
    pub types: &'a mut TypeRegistry,
    /// Function registry for the specialization's methods
    pub functions: &'a mut FunctionRegistry,
    /// Module the specialization is declared in
    pub module: ModuleId,
}

/// Produces a concrete type for a template instantiated with the given
/// argument types.
pub type Specializer = Arc<dyn Fn(&mut SpecializeCtx<'_>, &[TypeId]) -> Result<TypeId> + Send + Sync>;

/// Emit a word-wise copy of `size` bytes from the address in `src` to
/// the address in `dst`. Used for POD copy construction and aggregate
/// return copy-out.
pub fn emit_memcopy(func: &mut FunctionDef, dst: &Value, src: &Value, size: u32) {
    let b = func.builtins();
    let mut off = 0u32;
    while off + 8 <= size {
        let tmp = func.val(b.u64_t);
        let o = func.imm_u32(off);
        func.add(Opcode::Load).op(tmp.clone()).op(src.clone()).op(o);
        let o = func.imm_u32(off);
        func.add(Opcode::Store).op(tmp).op(dst.clone()).op(o);
        off += 8;
    }
    // Tail smaller than a word copies with narrowing loads
    for (width, tp) in [(4u32, b.u32_t), (2, b.u16_t), (1, b.u8_t)] {
        while off + width <= size {
            let tmp = func.val(tp);
            let o = func.imm_u32(off);
            func.add(Opcode::Load).op(tmp.clone()).op(src.clone()).op(o);
            let o = func.imm_u32(off);
            func.add(Opcode::Store).op(tmp).op(dst.clone()).op(o);
            off += width;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtins;
    use crate::lexer::SourceSpan;

    #[test]
    fn memcopy_covers_odd_sizes() {
        let mut reg = TypeRegistry::new();
        let b = Builtins::register(&mut reg);
        let mut f = FunctionDef::new("t", ModuleId(1), None, b, SourceSpan::default());
        let dst = f.val(b.ptr_t);
        let src = f.val(b.ptr_t);
        emit_memcopy(&mut f, &dst, &src, 13);
        // 8 + 4 + 1 bytes -> three load/store pairs
        let loads = f.code.iter().filter(|i| i.op == Opcode::Load).count();
        let stores = f.code.iter().filter(|i| i.op == Opcode::Store).count();
        assert_eq!(loads, 3);
        assert_eq!(stores, 3);
    }
}
