use criterion::{black_box, criterion_group, criterion_main, Criterion};
use jim::script::{Interpreter, Value};

fn bench_eval(c: &mut Criterion) {
    let mut g = c.benchmark_group("eval");

    let mut interp = Interpreter::new();
    interp
        .eval_toplevel("proc add {a b} { expr {$a + $b} }")
        .unwrap();
    let calls = Value::from("set s 0; for {set i 0} {$i < 1000} {incr i} { set s [add $s $i] }");
    g.bench_function("proc_call_loop", |b| {
        b.iter(|| interp.eval_value(black_box(&calls)).unwrap())
    });

    let mut interp = Interpreter::new();
    interp.eval_toplevel("set x 10").unwrap();
    let fast = Value::from("expr {$x < 20}");
    g.bench_function("expr_fast_path", |b| {
        b.iter(|| interp.eval_value(black_box(&fast)).unwrap())
    });

    let mut interp = Interpreter::new();
    let append = Value::from("set l {}; for {set i 0} {$i < 1000} {incr i} { lappend l $i }; llength $l");
    g.bench_function("list_append", |b| {
        b.iter(|| interp.eval_value(black_box(&append)).unwrap())
    });

    g.finish();
}

criterion_group!(benches, bench_eval);
criterion_main!(benches);
