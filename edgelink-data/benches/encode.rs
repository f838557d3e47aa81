use criterion::{criterion_group, criterion_main, Criterion};
use edgelink_data::{serialize, EdgeData};

fn bench_serialize(c: &mut Criterion) {
    let mut data = EdgeData::new();
    data.add(&[0u8; 4096]).unwrap();
    data.add(&[1u8; 1024]).unwrap();
    data.set_info("client_id", "42");
    data.set_info("topic", "frame");

    c.bench_function("serialize 2-slot edge-data", |b| {
        b.iter(|| serialize(&data));
    });
}

criterion_group!(benches, bench_serialize);
criterion_main!(benches);
