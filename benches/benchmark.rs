use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use recordkeeper::session::Session;

// a register file plus instructions deriving through a few levels of classes
fn source(defs: usize) -> String {
    let mut text = String::from(
        "class Reg<int n> { int num = n; bits<8> enc = n; }\n\
         class Inst { string asm = \"\"; bits<8> op = 0; list<Reg> uses = []; }\n\
         class Alu : Inst;\n\
         class Mem : Inst;\n\
         class Load : Mem { let asm = \"ld\"; }\n",
    );
    for i in 0..defs {
        text.push_str(&format!("def R{i} : Reg<{}>;\n", i % 256));
    }
    for i in 0..defs {
        let class = if i % 3 == 0 { "Load" } else { "Alu" };
        text.push_str(&format!(
            "def I{i} : {class} {{ let op = {}; let uses = [R{}]; }}\n",
            i % 256,
            i
        ));
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let small = source(10);
    let large = source(1000);
    c.bench_function("parse 10", |b| {
        b.iter(|| Session::open(black_box(&small), Vec::<String>::new()))
    });
    c.bench_function("parse 1k", |b| {
        b.iter(|| Session::open(black_box(&large), Vec::<String>::new()))
    });
    let session = match Session::open(&large, Vec::<String>::new()) {
        Ok(session) => session,
        Err(e) => panic!("benchmark source should parse: {e}"),
    };
    let keeper = session.record_keeper();
    c.bench_function("derived definitions 1k", |b| {
        b.iter(|| keeper.all_derived_definitions(black_box("Mem")).len())
    });
    c.bench_function("def lookup 1k", |b| {
        b.iter(|| keeper.get_def(black_box("I999")).map(|record| record.fields().len()))
    });
    c.bench_function("field value 1k", |b| {
        b.iter(|| keeper.get_def("R128").and_then(|record| record.value_as_bits("enc").ok()).map(|bits| bits.len()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
