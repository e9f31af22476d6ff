use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stratadb::codec::{KeyCodec, KeyValue};
use stratadb::{Column, ColumnRange, KeyRange, StrataConfig, StrataDb};

const TABLE: &[u8] = b"users";
const SEEDED_KEYS: u32 = 10_000;
const COLUMNS_PER_KEY: u8 = 4;

fn setup_db() -> (StrataDb, stratadb::KeyspaceHandle) {
    let db = StrataDb::in_memory(StrataConfig::default()).expect("open");
    let ks = db.register_keyspace("bench").expect("register");
    for i in 0..SEEDED_KEYS {
        let key = format!("key-{i:08}");
        let columns = (0..COLUMNS_PER_KEY)
            .map(|c| Column::new(vec![b'c', c], format!("value-{i}-{c}").into_bytes()))
            .collect();
        ks.put_columns(TABLE, key.as_bytes(), columns).expect("seed");
    }
    (db, ks)
}

fn bench_codec(c: &mut Criterion) {
    let codec = KeyCodec::tuple3(
        KeyCodec::SelfDelimited,
        KeyCodec::PositiveInt64Complement,
        KeyCodec::Byte,
    );
    let value = KeyValue::tuple(vec![
        KeyValue::bytes(b"table/key/column".to_vec()),
        KeyValue::Int(1_700_000_000_000_000),
        KeyValue::Byte(7),
    ]);
    let encoded = codec.encode_to_vec(&value).expect("encode");

    c.bench_function("codec_tuple3_encode", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(64);
            codec.encode(&mut out, black_box(&value)).expect("encode");
            black_box(out)
        })
    });
    c.bench_function("codec_tuple3_decode", |b| {
        b.iter(|| codec.decode_value(black_box(&encoded)).expect("decode"))
    });
}

fn bench_point_reads(c: &mut Criterion) {
    let (_db, ks) = setup_db();
    c.bench_function("get_column_point_read", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("key-{:08}", i % SEEDED_KEYS);
            i = i.wrapping_add(7_919);
            ks.get_column(TABLE, key.as_bytes(), b"c\x00")
                .expect("get")
                .expect("present")
        })
    });
}

fn bench_slice_scan(c: &mut Criterion) {
    let (_db, ks) = setup_db();
    c.bench_function("get_slice_100_keys", |b| {
        b.iter(|| {
            ks.get_slice(
                TABLE,
                KeyRange::range(Some(b"key-00005000".to_vec()), None::<Vec<u8>>),
                ColumnRange::All,
                100,
                usize::MAX,
            )
            .expect("slice")
        })
    });
    c.bench_function("count_keys_full_table", |b| {
        b.iter(|| ks.count_keys(TABLE, KeyRange::all()).expect("count"))
    });
}

fn bench_commit(c: &mut Criterion) {
    let (_db, ks) = setup_db();
    c.bench_function("commit_single_put", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            ks.put_columns(
                TABLE,
                format!("hot-{i}").as_bytes(),
                vec![Column::new(b"c".to_vec(), b"v".to_vec())],
            )
            .expect("put")
        })
    });
}

criterion_group!(
    benches,
    bench_codec,
    bench_point_reads,
    bench_slice_scan,
    bench_commit
);
criterion_main!(benches);
