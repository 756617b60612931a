//! End-to-end scenarios: compile + run through the whole pipeline and
//! observe results from the host side.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tsn::{CallArg, Config, Runtime};

fn runtime() -> Runtime {
    Runtime::new(Config::default()).unwrap()
}

fn compile_and_init(rt: &Runtime, src: &str) -> Arc<tsn::Module> {
    let (module, _log) = rt.compile("test.tsn", src).expect("compiles");
    rt.init_module(&module).expect("init runs");
    module
}

#[test]
fn primitive_arithmetic_precedence() {
    let rt = runtime();
    let module = compile_and_init(&rt, "export function main() : i32 { return 2 + 3 * 4; }");
    let main = rt.find_function(&module, "main").unwrap();
    assert_eq!(rt.call(main, &[]).unwrap().as_i32(), Some(14));
}

#[test]
fn arguments_and_locals() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        export function main(a: i32, b: i32) : i32 {
            let d : i32 = a - b;
            let s : i32 = a + b;
            return d * s;
        }
        "#,
    );
    let main = rt.find_function(&module, "main").unwrap();
    let r = rt
        .call(main, &[CallArg::I32(10), CallArg::I32(4)])
        .unwrap();
    assert_eq!(r.as_i32(), Some(6 * 14));
}

#[test]
fn host_function_call_with_host_object() {
    struct Text(String);

    let rt = runtime();
    let binder = rt.bind_type::<Text>("Text");
    rt.install_type(binder).unwrap();
    rt.bind_function("len", |t: &Text| -> u32 { t.0.len() as u32 })
        .unwrap();

    let module = compile_and_init(
        &rt,
        "export function main(s: Text) : u32 { return len(s); }",
    );
    let main = rt.find_function(&module, "main").unwrap();

    // Bound types hash their script-facing name into their id
    let text_type = tsn::types::type_id_from_name("Text");
    let handle = rt.new_host_object(Text("hello".to_string()));
    let r = rt.call(main, &[CallArg::Object(handle, text_type)]).unwrap();
    assert_eq!(r.as_u32(), Some(5));
}

#[test]
fn constructor_and_destructor_balance() {
    struct Counter {
        live: Arc<AtomicI32>,
    }
    impl Drop for Counter {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    let live = Arc::new(AtomicI32::new(0));
    let constructed = Arc::new(AtomicI32::new(0));

    let rt = runtime();
    let live_c = Arc::clone(&live);
    let constructed_c = Arc::clone(&constructed);
    let binder = rt.bind_type::<Counter>("Counter").ctor(move || {
        live_c.fetch_add(1, Ordering::SeqCst);
        constructed_c.fetch_add(1, Ordering::SeqCst);
        Counter {
            live: Arc::clone(&live_c),
        }
    });
    rt.install_type(binder).unwrap();

    let module = compile_and_init(
        &rt,
        r#"
        export function main() : i32 {
            {
                let c : Counter;
            }
            return 0;
        }
        "#,
    );
    let main = rt.find_function(&module, "main").unwrap();
    rt.call(main, &[]).unwrap();

    assert_eq!(constructed.load(Ordering::SeqCst), 1, "constructed once");
    assert_eq!(live.load(Ordering::SeqCst), 0, "destroyed at scope exit");
    assert_eq!(rt.live_host_objects(), 0);
}

#[test]
fn destructor_runs_once_on_every_path() {
    struct Probe {
        live: Arc<AtomicI32>,
    }
    impl Drop for Probe {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    let live = Arc::new(AtomicI32::new(0));
    let rt = runtime();
    let live_c = Arc::clone(&live);
    let binder = rt.bind_type::<Probe>("Probe").ctor(move || {
        live_c.fetch_add(1, Ordering::SeqCst);
        Probe {
            live: Arc::clone(&live_c),
        }
    });
    rt.install_type(binder).unwrap();

    let module = compile_and_init(
        &rt,
        r#"
        export function branchy(flag: i32) : i32 {
            let p : Probe;
            if (flag > 0) {
                return 1;
            }
            return 2;
        }
        "#,
    );
    let f = rt.find_function(&module, "branchy").unwrap();

    assert_eq!(rt.call(f, &[CallArg::I32(1)]).unwrap().as_i32(), Some(1));
    assert_eq!(live.load(Ordering::SeqCst), 0, "early return destroys");

    assert_eq!(rt.call(f, &[CallArg::I32(-1)]).unwrap().as_i32(), Some(2));
    assert_eq!(live.load(Ordering::SeqCst), 0, "fallthrough destroys");
}

#[test]
fn return_paths_are_bit_exact() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        export function ret_i32(x: i32) : i32 { return x; }
        export function ret_u64(x: u64) : u64 { return x; }
        export function ret_f32(x: f32) : f32 { return x; }
        export function ret_f64(x: f64) : f64 { return x; }
        export function ret_bool(x: bool) : bool { return x; }
        export function ret_void(x: i32) { let y : i32 = x; }
        "#,
    );

    let f = rt.find_function(&module, "ret_i32").unwrap();
    assert_eq!(
        rt.call(f, &[CallArg::I32(-123456)]).unwrap().as_i32(),
        Some(-123456)
    );

    let f = rt.find_function(&module, "ret_u64").unwrap();
    assert_eq!(
        rt.call(f, &[CallArg::U64(u64::MAX - 7)]).unwrap().as_u64(),
        Some(u64::MAX - 7)
    );

    let f = rt.find_function(&module, "ret_f32").unwrap();
    let weird = f32::from_bits(0x7f80_0001u32 ^ 0x0010_0000);
    let got = rt.call(f, &[CallArg::F32(weird)]).unwrap().as_f32().unwrap();
    assert_eq!(got.to_bits(), weird.to_bits(), "f32 bits preserved");

    let f = rt.find_function(&module, "ret_f64").unwrap();
    let got = rt
        .call(f, &[CallArg::F64(-0.0)])
        .unwrap()
        .as_f64()
        .unwrap();
    assert_eq!(got.to_bits(), (-0.0f64).to_bits(), "f64 bits preserved");

    let f = rt.find_function(&module, "ret_bool").unwrap();
    assert_eq!(rt.call(f, &[CallArg::Bool(true)]).unwrap().as_bool(), Some(true));

    let f = rt.find_function(&module, "ret_void").unwrap();
    let r = rt.call(f, &[CallArg::I32(1)]).unwrap();
    assert!(r.bits().is_none());
}

#[test]
fn control_flow_loops() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        export function sum_to(n: i32) : i32 {
            let acc : i32 = 0;
            for (let i : i32 = 1; i <= n; i = i + 1) {
                acc = acc + i;
            }
            return acc;
        }

        export function collatz_steps(n0: i32) : i32 {
            let n : i32 = n0;
            let steps : i32 = 0;
            while (n != 1) {
                if (n % 2 == 0) { n = n / 2; } else { n = 3 * n + 1; }
                steps = steps + 1;
            }
            return steps;
        }

        export function do_while_runs_once(x: i32) : i32 {
            let n : i32 = x;
            do { n = n + 1; } while (n < 0);
            return n;
        }
        "#,
    );

    let f = rt.find_function(&module, "sum_to").unwrap();
    assert_eq!(rt.call(f, &[CallArg::I32(10)]).unwrap().as_i32(), Some(55));

    let f = rt.find_function(&module, "collatz_steps").unwrap();
    assert_eq!(rt.call(f, &[CallArg::I32(6)]).unwrap().as_i32(), Some(8));

    let f = rt.find_function(&module, "do_while_runs_once").unwrap();
    assert_eq!(rt.call(f, &[CallArg::I32(5)]).unwrap().as_i32(), Some(6));
}

#[test]
fn float_and_unsigned_arithmetic() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        export function fma(a: f64, b: f64, c: f64) : f64 { return a * b + c; }
        export function halve(a: f32) : f32 { return a / 2.0; }
        export function umix(a: u32, b: u32) : u32 { return a / b + a % b; }
        export function bits(a: u64, b: u64) : u64 { return (a << 2) ^ (b & 255); }
        "#,
    );

    let f = rt.find_function(&module, "fma").unwrap();
    let r = rt
        .call(f, &[CallArg::F64(2.5), CallArg::F64(4.0), CallArg::F64(1.25)])
        .unwrap();
    assert_eq!(r.as_f64(), Some(11.25));

    let f = rt.find_function(&module, "halve").unwrap();
    let r = rt.call(f, &[CallArg::F32(7.0)]).unwrap();
    assert_eq!(r.as_f32(), Some(3.5));

    let f = rt.find_function(&module, "umix").unwrap();
    let r = rt.call(f, &[CallArg::U32(17), CallArg::U32(5)]).unwrap();
    assert_eq!(r.as_u32(), Some(17 / 5 + 17 % 5));

    let f = rt.find_function(&module, "bits").unwrap();
    let r = rt
        .call(f, &[CallArg::U64(0x11), CallArg::U64(0x3ff)])
        .unwrap();
    assert_eq!(r.as_u64(), Some((0x11u64 << 2) ^ (0x3ffu64 & 255)));
}

#[test]
fn conditional_expression() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        "export function max(a: i32, b: i32) : i32 { return a > b ? a : b; }",
    );
    let f = rt.find_function(&module, "max").unwrap();
    assert_eq!(
        rt.call(f, &[CallArg::I32(3), CallArg::I32(9)]).unwrap().as_i32(),
        Some(9)
    );
    assert_eq!(
        rt.call(f, &[CallArg::I32(12), CallArg::I32(9)]).unwrap().as_i32(),
        Some(12)
    );
}

#[test]
fn script_class_with_methods_and_heap_lifetime() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        class Point {
            x : i32;
            y : i32;
            constructor(x: i32, y: i32) {
                this.x = x;
                this.y = y;
            }
            function magSq() : i32 {
                return this.x * this.x + this.y * this.y;
            }
        }

        export function main() : i32 {
            let p = new Point(3, 4);
            let m : i32 = p.magSq();
            delete p;
            return m;
        }
        "#,
    );
    let main = rt.find_function(&module, "main").unwrap();
    assert_eq!(rt.call(main, &[]).unwrap().as_i32(), Some(25));
    assert_eq!(rt.live_heap_blocks(), 0, "delete released the allocation");
}

#[test]
fn enums_resolve_to_constants() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        enum Color { Red, Green = 5, Blue }

        export function green() : i32 { return Color.Green; }
        export function blue() : i32 { return Color.Blue; }
        "#,
    );
    let f = rt.find_function(&module, "green").unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some(5));
    let f = rt.find_function(&module, "blue").unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some(6));
}

#[test]
fn module_level_variables_and_init() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        r#"
        let counter : i32 = 40;

        export function bump() : i32 {
            counter = counter + 1;
            return counter;
        }
        "#,
    );
    // Init is idempotent: running it again must not reset the slot.
    rt.init_module(&module).unwrap();

    let f = rt.find_function(&module, "bump").unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some(41));
    rt.init_module(&module).unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some(42));
}

#[test]
fn cross_module_import() {
    let rt = runtime();
    let (util, _) = rt
        .compile(
            "util.tsn",
            "export function double(x: i32) : i32 { return x + x; }",
        )
        .unwrap();
    rt.init_module(&util).unwrap();

    let (main_mod, _) = rt
        .compile(
            "main.tsn",
            r#"
            import util;
            export function main() : i32 { return util.double(21); }
            "#,
        )
        .unwrap();
    rt.init_module(&main_mod).unwrap();

    let main = rt.find_function(&main_mod, "main").unwrap();
    assert_eq!(rt.call(main, &[]).unwrap().as_i32(), Some(42));
}

#[test]
fn division_by_zero_surfaces_a_trace_error() {
    let rt = runtime();
    let module = compile_and_init(
        &rt,
        "export function div(a: i32, b: i32) : i32 { return a / b; }",
    );
    let f = rt.find_function(&module, "div").unwrap();
    assert_eq!(
        rt.call(f, &[CallArg::I32(10), CallArg::I32(2)]).unwrap().as_i32(),
        Some(5)
    );
    let err = rt.call(f, &[CallArg::I32(10), CallArg::I32(0)]).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("division"));
}

#[test]
fn spill_pressure_with_forty_live_temporaries() {
    // 40 concurrently live i32 temporaries on a 16-GPR target must
    // still produce the right sum, with at least 24 ranges spilled.
    let mut src = String::from("export function spilly() : i32 {\n");
    for i in 0..40 {
        src.push_str(&format!("    let t{i} : i32 = {};\n", i + 1));
    }
    src.push_str("    return ");
    for i in 0..40 {
        if i > 0 {
            src.push_str(" + ");
        }
        src.push_str(&format!("t{i}"));
    }
    src.push_str(";\n}\n");

    let rt = runtime();
    let module = compile_and_init(&rt, &src);
    let f = rt.find_function(&module, "spilly").unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some((1..=40).sum()));

    let stats = rt.alloc_stats(f).expect("stats recorded");
    assert!(
        stats.gp_spills >= 24,
        "expected at least 24 spills, observed {}",
        stats.gp_spills
    );
}

#[test]
fn compile_errors_accumulate_and_refuse_emission() {
    let rt = runtime();
    let err = rt
        .compile(
            "bad.tsn",
            r#"
            export function a() : i32 { return unknown_symbol; }
            export function b() : i32 { return also_unknown; }
            "#,
        )
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("2 error"), "both errors counted: {text}");
}

#[test]
fn non_void_function_must_return() {
    let rt = runtime();
    let err = rt
        .compile("noret.tsn", "export function f() : i32 { let x : i32 = 1; }")
        .unwrap_err();
    assert!(err.to_string().contains("must return"));
}

#[test]
fn bound_type_properties_and_static_methods() {
    struct Gauge {
        value: i32,
    }

    let rt = runtime();
    let binder = rt
        .bind_type::<Gauge>("Gauge")
        .ctor(|| Gauge { value: 17 })
        .method("add", |g: &mut Gauge, n: i32| {
            g.value += n;
        })
        .prop(
            "value",
            |g: &Gauge| g.value,
            |g: &mut Gauge, v: i32| g.value = v,
        )
        .static_method("magic", || -> i32 { 99 });
    rt.install_type(binder).unwrap();

    let module = compile_and_init(
        &rt,
        r#"
        export function use_gauge() : i32 {
            let g : Gauge;
            g.add(5);
            g.value = g.value + 1;
            return g.value;
        }

        export function magic() : i32 { return Gauge.magic(); }
        "#,
    );

    let f = rt.find_function(&module, "use_gauge").unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some(23));

    let f = rt.find_function(&module, "magic").unwrap();
    assert_eq!(rt.call(f, &[]).unwrap().as_i32(), Some(99));
}
