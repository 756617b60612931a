//! Type system properties: the equivalence relation, signature
//! interning, id stability and the convertibility/assignability rules.

use proptest::prelude::*;
use tsn::types::{
    type_id_from_name, type_id_from_signature, AccessModifier, ArgKind, DataType, Function,
    FunctionArg, FunctionRegistry, FunctionSignature, Property, PropertyFlags, TypeMeta,
    TypeRegistry,
};
use tsn::Builtins;

fn registry() -> (TypeRegistry, Builtins) {
    let mut types = TypeRegistry::new();
    let b = Builtins::register(&mut types);
    (types, b)
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

fn prop(name: &str, offset: u64, type_id: tsn::TypeId) -> Property {
    Property {
        name: name.to_string(),
        access: AccessModifier::Public,
        offset,
        type_id,
        flags: PropertyFlags::rw(),
        getter: None,
        setter: None,
    }
}

fn make_struct(name: &str, b: &Builtins) -> DataType {
    let mut tp = DataType::plain(name, name, pod_meta(16));
    tp.properties = vec![prop("x", 0, b.i32_t), prop("y", 8, b.f64_t)];
    tp
}

#[test]
fn equivalence_is_reflexive() {
    let (mut types, b) = registry();
    let a = types.add(make_struct("A", &b)).unwrap();
    assert!(a.is_equivalent_to(&a, &types));
}

#[test]
fn equivalence_is_symmetric_and_transitive() {
    let (mut types, b) = registry();
    let a = types.add(make_struct("A", &b)).unwrap();
    let c = types.add(make_struct("B", &b)).unwrap();
    let d = types.add(make_struct("C", &b)).unwrap();

    assert!(a.is_equivalent_to(&c, &types));
    assert!(c.is_equivalent_to(&a, &types));
    assert!(c.is_equivalent_to(&d, &types));
    assert!(a.is_equivalent_to(&d, &types));
}

#[test]
fn equivalence_rejects_attribute_mismatch() {
    let (mut types, b) = registry();
    let a = types.add(make_struct("A", &b)).unwrap();
    let mut other = make_struct("B", &b);
    other.meta.is_pod = false;
    let other = types.add(other).unwrap();
    assert!(!a.is_equivalent_to(&other, &types));
}

#[test]
fn equivalence_rejects_property_mismatch() {
    let (mut types, b) = registry();
    let a = types.add(make_struct("A", &b)).unwrap();

    let mut shifted = make_struct("B", &b);
    shifted.properties[1].offset = 12;
    let shifted = types.add(shifted).unwrap();
    assert!(!a.is_equivalent_to(&shifted, &types));

    let mut renamed = make_struct("C", &b);
    renamed.properties[0].name = "z".into();
    let renamed = types.add(renamed).unwrap();
    assert!(!a.is_equivalent_to(&renamed, &types));
}

#[test]
fn equivalence_checks_methods() {
    let (mut types, b) = registry();
    let mut functions = FunctionRegistry::new();

    let sig = types.intern_signature(FunctionSignature {
        return_type: b.i32_t,
        this_type: None,
        returns_pointer: false,
        args: vec![FunctionArg {
            kind: ArgKind::Value,
            type_id: b.i32_t,
        }],
    });

    let f1 = functions.add(Function::script("m", "A::m", sig.id, tsn::ModuleId(1), true));
    let f2 = functions.add(Function::script("m", "B::m", sig.id, tsn::ModuleId(1), true));
    let f3 = functions.add(Function::script(
        "other",
        "C::other",
        sig.id,
        tsn::ModuleId(1),
        true,
    ));
    types.sync_functions(functions.snapshot());

    let mut a = DataType::plain("A", "A", pod_meta(8));
    a.methods = vec![f1.id];
    let a = types.add(a).unwrap();

    let mut same = DataType::plain("B", "B", pod_meta(8));
    same.methods = vec![f2.id];
    let same = types.add(same).unwrap();

    let mut diff = DataType::plain("C", "C", pod_meta(8));
    diff.methods = vec![f3.id];
    let diff = types.add(diff).unwrap();

    assert!(a.is_equivalent_to(&same, &types));
    assert!(!a.is_equivalent_to(&diff, &types));
}

#[test]
fn equal_to_chases_aliases() {
    let (mut types, b) = registry();
    let base = types.get(b.i32_t).unwrap();
    let alias = types.add(DataType::alias("Int", "Int", &base)).unwrap();
    let alias2 = types
        .add(DataType::alias("Int2", "Int2", &alias))
        .unwrap();
    assert!(alias2.is_equal_to(&base, &types));
    assert!(base.is_equal_to(&alias, &types));
    assert_ne!(alias.id, base.id);
}

#[test]
fn ids_stable_for_names_and_structural_for_signatures() {
    assert_eq!(type_id_from_name("m::T"), type_id_from_name("m::T"));

    let (_, b) = registry();
    let sig = |ret, args: Vec<FunctionArg>| FunctionSignature {
        return_type: ret,
        this_type: None,
        returns_pointer: false,
        args,
    };
    let arg = |tid| FunctionArg {
        kind: ArgKind::Value,
        type_id: tid,
    };

    let s1 = sig(b.i32_t, vec![arg(b.f32_t)]);
    let s2 = sig(b.i32_t, vec![arg(b.f32_t)]);
    let s3 = sig(b.i32_t, vec![arg(b.f64_t)]);
    assert_eq!(type_id_from_signature(&s1), type_id_from_signature(&s2));
    assert_ne!(type_id_from_signature(&s1), type_id_from_signature(&s3));
}

#[test]
fn signature_interning_returns_one_object() {
    let (mut types, b) = registry();
    let make = || FunctionSignature {
        return_type: b.i32_t,
        this_type: None,
        returns_pointer: false,
        args: vec![
            FunctionArg {
                kind: ArgKind::RetPtr,
                type_id: b.i32_t,
            },
            FunctionArg {
                kind: ArgKind::Value,
                type_id: b.u64_t,
            },
        ],
    };
    let before = types.len();
    let first = types.intern_signature(make());
    let second = types.intern_signature(make());
    assert_eq!(first.id, second.id);
    assert_eq!(types.len(), before + 1);
}

#[test]
fn primitives_are_mutually_convertible_and_assignable() {
    let (types, b) = registry();
    let i32_t = types.get(b.i32_t).unwrap();
    let f64_t = types.get(b.f64_t).unwrap();
    assert!(i32_t.is_convertible_to(&f64_t, &types));
    assert!(f64_t.is_convertible_to(&i32_t, &types));
    assert!(i32_t.is_implicitly_assignable_to(&f64_t, &types));
}

#[test]
fn aggregates_are_not_convertible_without_a_constructor() {
    let (mut types, b) = registry();
    let a = types.add(make_struct("A", &b)).unwrap();
    let i32_t = types.get(b.i32_t).unwrap();
    assert!(!i32_t.is_convertible_to(&a, &types));
    assert!(!a.is_convertible_to(&i32_t, &types));
}

proptest! {
    /// Equivalence must behave as an equivalence relation for any
    /// shared structure.
    #[test]
    fn equivalence_relation_over_generated_structs(
        size in 1u32..64,
        offsets in proptest::collection::vec(0u64..64, 1..5),
        pod in any::<bool>(),
        unsigned in any::<bool>(),
    ) {
        let mut types = TypeRegistry::new();
        let b = Builtins::register(&mut types);

        let meta = TypeMeta {
            size,
            is_pod: pod,
            is_trivially_constructible: pod,
            is_trivially_copyable: pod,
            is_trivially_destructible: pod,
            is_unsigned: unsigned,
            ..TypeMeta::default()
        };

        let build = |name: &str| {
            let mut tp = DataType::plain(name, name, meta);
            tp.properties = offsets
                .iter()
                .enumerate()
                .map(|(i, off)| prop(&format!("p{i}"), *off, b.i32_t))
                .collect();
            tp
        };

        let x = types.add(build("X")).unwrap();
        let y = types.add(build("Y")).unwrap();
        let z = types.add(build("Z")).unwrap();

        // reflexive, symmetric, transitive
        prop_assert!(x.is_equivalent_to(&x, &types));
        prop_assert!(x.is_equivalent_to(&y, &types) == y.is_equivalent_to(&x, &types));
        if x.is_equivalent_to(&y, &types) && y.is_equivalent_to(&z, &types) {
            prop_assert!(x.is_equivalent_to(&z, &types));
        }
    }
}
