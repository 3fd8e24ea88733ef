#[macro_use]
extern crate criterion;

use criterion::Criterion;


criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = stackable::benchmark
}
criterion_main!(benches);
