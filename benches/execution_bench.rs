use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tsn::{CallArg, Config, Runtime};

fn compile_benchmark(c: &mut Criterion) {
    let source = r#"
        export function accumulate(n: i32) : i32 {
            let acc : i32 = 0;
            for (let i : i32 = 0; i < n; i = i + 1) {
                acc = acc + i * 3 - 1;
            }
            return acc;
        }
    "#;

    c.bench_function("compile small module", |b| {
        b.iter(|| {
            let rt = Runtime::new(Config::default()).unwrap();
            rt.compile("bench.tsn", black_box(source)).unwrap()
        })
    });
}

fn execute_benchmark(c: &mut Criterion) {
    let source = r#"
        export function accumulate(n: i32) : i32 {
            let acc : i32 = 0;
            for (let i : i32 = 0; i < n; i = i + 1) {
                acc = acc + i * 3 - 1;
            }
            return acc;
        }
    "#;
    let rt = Runtime::new(Config::default()).unwrap();
    let (module, _) = rt.compile("bench.tsn", source).unwrap();
    rt.init_module(&module).unwrap();
    let accumulate = rt.find_function(&module, "accumulate").unwrap();

    c.bench_function("run counted loop", |b| {
        b.iter(|| rt.call(accumulate, &[CallArg::I32(black_box(1000))]).unwrap())
    });
}

criterion_group!(benches, compile_benchmark, execute_benchmark);
criterion_main!(benches);
