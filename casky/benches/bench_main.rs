use criterion::{black_box, criterion_group, criterion_main, Criterion};

use casky::codec::Record;
use casky::storage::engine::{Engine, EngineConfig};

fn bench_codec_round_trip(c: &mut Criterion) {
    let record = Record::new(1, 0, b"benchmark-key".to_vec(), Some(vec![0u8; 256]));
    let encoded = record.encode();

    c.bench_function("record_encode", |b| {
        b.iter(|| black_box(record.encode()));
    });

    c.bench_function("record_decode", |b| {
        b.iter(|| {
            let mut cursor = std::io::Cursor::new(encoded.clone());
            Record::decode_from(&mut cursor, casky::codec::DEFAULT_MAX_FIELD_BYTES).unwrap();
        });
    });
}

fn bench_engine_put_get(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.cask");
    let engine = Engine::open_with_lock(&path, EngineConfig::default(), false)
        .unwrap()
        .into_engine();

    let mut i = 0u64;
    c.bench_function("engine_put", |b| {
        b.iter(|| {
            i += 1;
            engine.put(format!("key{}", i).as_bytes(), b"value", 0).unwrap();
        });
    });

    engine.put(b"hot-key", b"value", 0).unwrap();
    c.bench_function("engine_get", |b| {
        b.iter(|| black_box(engine.get(b"hot-key").unwrap()));
    });
}

criterion_group!(benches, bench_codec_round_trip, bench_engine_put_get);
criterion_main!(benches);
