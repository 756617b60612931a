//! FFI binder behavior: signature derivation, typed bind errors,
//! callback marshalling and type extension.

use tsn::ffi::Callback;
use tsn::{BindError, ByVal, CallArg, Config, Error, HostObject, Runtime};

fn runtime() -> Runtime {
    Runtime::new(Config::default()).unwrap()
}

struct Unbound;

#[test]
fn unbound_return_type_fails_the_bind() {
    let rt = runtime();
    let err = rt
        .bind_function("make", || -> HostObject<Unbound> { HostObject(Unbound) })
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Bind(BindError::FunctionReturnTypeUnbound { .. })
    ));
}

#[test]
fn unbound_argument_type_fails_the_bind() {
    struct Widget;
    let rt = runtime();
    let err = rt
        .bind_function("use_widget", |_w: &Widget| -> u32 { 0 })
        .unwrap_err();
    assert!(matches!(err, Error::Bind(BindError::ArgTypeUnbound { index: 0, .. })));
}

#[test]
fn aggregate_by_value_fails_the_bind() {
    struct Blob;
    let rt = runtime();
    let binder = rt.bind_type::<Blob>("Blob");
    rt.install_type(binder).unwrap();

    let err = rt
        .bind_function("takes_blob", |_b: ByVal<Blob>| -> u32 { 0 })
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Bind(BindError::ArgStructPassByValue { index: 0, .. })
    ));
}

#[test]
fn duplicate_property_fails_the_bind() {
    struct Meter {
        v: i32,
    }
    let rt = runtime();
    let binder = rt
        .bind_type::<Meter>("Meter")
        .prop_readonly("v", |m: &Meter| m.v)
        .prop_readonly("v", |m: &Meter| m.v + 1);
    let err = rt.install_type(binder).unwrap_err();
    assert!(matches!(err, Error::Bind(BindError::PropAlreadyBound { .. })));
}

#[test]
fn failed_bind_leaves_other_bindings_valid() {
    let rt = runtime();
    let ok = rt.bind_function("fine", |x: i32| -> i32 { x + 1 }).unwrap();
    let _ = rt
        .bind_function("broken", || -> HostObject<Unbound> { HostObject(Unbound) })
        .unwrap_err();
    // The earlier binding still calls
    assert_eq!(rt.call(ok, &[CallArg::I32(4)]).unwrap().as_i32(), Some(5));
}

#[test]
fn host_functions_call_directly_with_bit_exact_primitives() {
    let rt = runtime();
    let fid = rt
        .bind_function("mix", |a: u64, b: f64| -> u64 {
            a ^ b.to_bits()
        })
        .unwrap();
    let r = rt
        .call(fid, &[CallArg::U64(0xdead_beef), CallArg::F64(2.5)])
        .unwrap();
    assert_eq!(r.as_u64(), Some(0xdead_beefu64 ^ 2.5f64.to_bits()));
}

#[test]
fn callback_arguments_wrap_and_unwrap() {
    let rt = runtime();
    let fid = rt
        .bind_function("target_of", |cb: Callback| -> u32 {
            cb.raw.target_function.0
        })
        .unwrap();

    let r = rt
        .call(fid, &[CallArg::Callback(tsn::FunctionId(77))])
        .unwrap();
    assert_eq!(r.as_u32(), Some(77));
    // The wrapper was created by this call site and destroyed by it
    assert_eq!(rt.live_heap_blocks(), 0);
}

#[test]
fn methods_and_constructors_work_through_the_registry() {
    struct Accum {
        total: i64,
    }

    let rt = runtime();
    let binder = rt
        .bind_type::<Accum>("Accum")
        .ctor(|| Accum { total: 0 })
        .ctor(|seed: i64| Accum { total: seed })
        .method("add", |a: &mut Accum, v: i64| {
            a.total += v;
        })
        .method("total", |a: &Accum| -> i64 { a.total });
    let tp = rt.install_type(binder).unwrap();
    assert!(tp.meta.is_host);
    assert!(!tp.meta.is_trivially_destructible || !std::mem::needs_drop::<Accum>());

    // Drive the bound methods directly through the call API
    let handle = rt.new_host_object(Accum { total: 10 });
    let add = rt
        .with_types(|types| {
            let methods = tp.find_methods("add", None, types);
            methods.first().copied()
        })
        .unwrap();
    rt.call_method(add, CallArg::Object(handle, tp.id), &[CallArg::I64(32)])
        .unwrap();
    rt.with_host_object::<Accum, _>(handle, |a| assert_eq!(a.total, 42))
        .unwrap();
}

#[test]
fn extender_adds_methods_to_bound_types() {
    struct Point2 {
        x: i32,
        y: i32,
    }

    let rt = runtime();
    let binder = rt.bind_type::<Point2>("Point2").ctor(|| Point2 { x: 3, y: 4 });
    rt.install_type(binder).unwrap();

    let ext = rt
        .extend_type::<Point2>()
        .method("manhattan", |p: &Point2| -> i32 { p.x.abs() + p.y.abs() });
    let tp = rt.install_extension(ext).unwrap();

    let handle = rt.new_host_object(Point2 { x: -2, y: 9 });
    let m = rt
        .with_types(|types| tp.find_methods("manhattan", None, types).first().copied())
        .unwrap();
    let r = rt.call_method(m, CallArg::Object(handle, tp.id), &[]).unwrap();
    assert_eq!(r.as_i32(), Some(11));
}

#[test]
fn primitive_binder_registers_value_type() {
    #[derive(Clone, Copy)]
    struct Ticks(u64);

    let rt = runtime();
    let binder = rt.bind_primitive::<Ticks>("Ticks");
    let tp = rt.install_primitive(binder).unwrap();
    assert!(tp.meta.is_primitive);
    assert!(tp.meta.is_host);
    assert_eq!(tp.meta.size, 8);
}

#[test]
fn globals_are_reachable_by_name() {
    let rt = runtime();
    let h = rt.add_global("config_version", 42i64).unwrap();
    assert_eq!(rt.global("config_version"), Some(h));
    rt.with_host_object::<i64, _>(h, |v| assert_eq!(*v, 42)).unwrap();
}
