//! Inline code generation and template specialization: the mechanism
//! generic containers are built on. An intrinsic expands to IR at its
//! call sites; a template's specializer produces a concrete type per
//! argument list, interned once.

use std::sync::Arc;

use tsn::compiler::intrinsics::{IntrinsicCall, SpecializeCtx};
use tsn::compiler::ir::Opcode;
use tsn::types::{
    AccessModifier, ArgKind, DataType, Function, FunctionArg, FunctionSignature, Property,
    PropertyFlags, TypeId, TypeMeta,
};
use tsn::{CallArg, Config, Runtime};

fn runtime() -> Runtime {
    Runtime::new(Config::default()).unwrap()
}

#[test]
fn intrinsic_expands_at_the_call_site() {
    let rt = runtime();
    let b = rt.builtins();
    rt.bind_intrinsic(
        "twice",
        b.i32_t,
        &[b.i32_t],
        Arc::new(|call: &mut IntrinsicCall<'_>| {
            let dst = call.func.val(call.ret_type);
            call.func
                .add(Opcode::IAdd)
                .op(dst.clone())
                .op(call.args[0].clone())
                .op(call.args[0].clone());
            Ok(dst)
        }),
    )
    .unwrap();

    let (module, _) = rt
        .compile("t.tsn", "export function main(x: i32) : i32 { return twice(x) + 1; }")
        .unwrap();
    rt.init_module(&module).unwrap();
    let main = rt.find_function(&module, "main").unwrap();
    assert_eq!(rt.call(main, &[CallArg::I32(21)]).unwrap().as_i32(), Some(43));
}

fn pod_meta(size: u32) -> TypeMeta {
    TypeMeta {
        size,
        is_pod: true,
        is_trivially_constructible: true,
        is_trivially_copyable: true,
        is_trivially_destructible: true,
        ..TypeMeta::default()
    }
}

/// A `Cell<T>`-style container: one stored value, `get`/`set` expand
/// inline to a load/store against the receiver.
fn specialize_cell(ctx: &mut SpecializeCtx<'_>, args: &[TypeId]) -> tsn::Result<TypeId> {
    let elem = args[0];
    let elem_tp = ctx.types.get(elem).expect("element type exists");
    let name = format!("Cell${}", elem_tp.name);
    if let Some(existing) = ctx.types.all().find(|t| t.fully_qualified_name == name) {
        return Ok(existing.id);
    }

    let mut cell = DataType::plain(&name, &name, pod_meta(elem_tp.meta.size.max(1)));
    cell.owner = Some(ctx.module);
    cell.template_args = vec![elem];
    cell.properties = vec![Property {
        name: "value".into(),
        access: AccessModifier::Public,
        offset: 0,
        type_id: elem,
        flags: PropertyFlags::rw(),
        getter: None,
        setter: None,
    }];
    let cell_id = cell.id;

    // get() : T - loads the stored value from the receiver
    let get_sig = ctx.types.intern_signature(FunctionSignature {
        return_type: elem,
        this_type: Some(cell_id),
        returns_pointer: false,
        args: vec![FunctionArg {
            kind: ArgKind::ThisPtr,
            type_id: cell_id,
        }],
    });
    let get = ctx.functions.add(Function::intrinsic(
        "get",
        &format!("{name}::get"),
        get_sig.id,
        Arc::new(|call: &mut IntrinsicCall<'_>| {
            let this = call.this.clone().expect("get has a receiver");
            let f = &mut call.func;
            let dst = f.val(call.ret_type);
            let zero = f.imm_u32(0);
            f.add(Opcode::Load).op(dst.clone()).op(this).op(zero);
            Ok(dst)
        }),
        true,
    ));

    // set(v: T) - stores into the receiver
    let set_sig = ctx.types.intern_signature(FunctionSignature {
        return_type: tsn::types::type_id_from_name("void"),
        this_type: Some(cell_id),
        returns_pointer: false,
        args: vec![
            FunctionArg {
                kind: ArgKind::ThisPtr,
                type_id: cell_id,
            },
            FunctionArg {
                kind: ArgKind::Value,
                type_id: elem,
            },
        ],
    });
    let set = ctx.functions.add(Function::intrinsic(
        "set",
        &format!("{name}::set"),
        set_sig.id,
        Arc::new(|call: &mut IntrinsicCall<'_>| {
            let this = call.this.clone().expect("set has a receiver");
            let v = call.args[0].clone();
            let f = &mut call.func;
            let zero = f.imm_u32(0);
            f.add(Opcode::Store).op(v).op(this).op(zero);
            Ok(f.null())
        }),
        true,
    ));

    cell.methods = vec![get.id, set.id];
    let arc = ctx.types.add(cell)?;
    ctx.types.sync_functions(ctx.functions.snapshot());
    Ok(arc.id)
}

#[test]
fn template_specialization_produces_working_containers() {
    let rt = runtime();
    rt.register_template("Cell", Arc::from(&b""[..]), Arc::new(specialize_cell))
        .unwrap();

    let (module, _) = rt
        .compile(
            "cell.tsn",
            r#"
            export function main() : i32 {
                let c : Cell<i32>;
                c.set(7);
                return c.get() * 6;
            }
            "#,
        )
        .unwrap();
    rt.init_module(&module).unwrap();
    let main = rt.find_function(&module, "main").unwrap();
    assert_eq!(rt.call(main, &[]).unwrap().as_i32(), Some(42));
}

#[test]
fn specializations_are_interned_per_argument_list() {
    let rt = runtime();
    rt.register_template("Cell", Arc::from(&b""[..]), Arc::new(specialize_cell))
        .unwrap();

    let (module, _) = rt
        .compile(
            "cells.tsn",
            r#"
            export function main() : i32 {
                let a : Cell<i32>;
                let b : Cell<i32>;
                a.set(1);
                b.set(2);
                return a.get() + b.get();
            }
            "#,
        )
        .unwrap();
    rt.init_module(&module).unwrap();

    // Both declarations resolved to one specialization
    let count = rt.with_types(|types| {
        types
            .all()
            .filter(|t| t.fully_qualified_name.starts_with("Cell$"))
            .count()
    });
    assert_eq!(count, 1);

    let main = rt.find_function(&module, "main").unwrap();
    assert_eq!(rt.call(main, &[]).unwrap().as_i32(), Some(3));
}

#[test]
fn direct_property_access_on_specializations() {
    let rt = runtime();
    rt.register_template("Cell", Arc::from(&b""[..]), Arc::new(specialize_cell))
        .unwrap();

    let (module, _) = rt
        .compile(
            "cellprop.tsn",
            r#"
            export function main() : i32 {
                let c : Cell<i32>;
                c.value = 9;
                return c.value + 1;
            }
            "#,
        )
        .unwrap();
    rt.init_module(&module).unwrap();
    let main = rt.find_function(&module, "main").unwrap();
    assert_eq!(rt.call(main, &[]).unwrap().as_i32(), Some(10));
}
