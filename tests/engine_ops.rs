use stratadb::query::KeySlice;
use stratadb::{
    Column, ColumnRange, KeyRange, StrataConfig, StrataDb, StrataError, StrataErrorCode,
    Timestamp,
};

fn open_db() -> StrataDb {
    StrataDb::in_memory(StrataConfig::development()).expect("open")
}

fn col(name: &str, value: &str) -> Column {
    Column::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
}

fn slice_names(slice: &KeySlice) -> Vec<Vec<u8>> {
    slice.columns.iter().map(|c| c.name.clone()).collect()
}

#[test]
fn register_put_and_read_column_values() {
    let db = open_db();
    let ks = db.register_keyspace("users").expect("register");
    ks.put_columns(b"t", b"alice", vec![col("name", "A"), col("age", "30")])
        .expect("put");

    let values = ks
        .get_column_values(b"t", b"alice", &[b"name".to_vec(), b"missing".to_vec()])
        .expect("get");
    assert_eq!(values, vec![Some(b"A".to_vec()), None]);
}

#[test]
fn keyspace_ids_are_dense_and_stable() {
    let db = open_db();
    let a = db.register_keyspace("a").expect("register a");
    let b = db.register_keyspace("b").expect("register b");
    assert_eq!(a.id(), 1);
    assert_eq!(b.id(), 2);
    // Re-registration returns the same id.
    assert_eq!(db.register_keyspace("a").expect("again").id(), 1);
    assert_eq!(
        db.list_keyspaces(),
        vec![("a".to_string(), 1), ("b".to_string(), 2)]
    );
    let missing = db.get_keyspace("nope").expect_err("unknown");
    assert_eq!(missing.code(), StrataErrorCode::UnknownKeyspace);
}

#[test]
fn committed_columns_are_readable_with_timestamps() {
    let db = open_db();
    let ks = db.register_keyspace("ks").expect("register");
    ks.put_columns(b"t", b"k", vec![col("c1", "v1"), col("c2", "v2")])
        .expect("put");

    for (name, value) in [(b"c1", "v1"), (b"c2", "v2")] {
        let column = ks
            .get_column(b"t", b"k", name)
            .expect("get")
            .expect("present");
        assert_eq!(column.value, value.as_bytes());
        assert!(matches!(column.timestamp, Timestamp::At(ts) if ts > 0));
    }
}

#[test]
fn newest_version_of_a_column_wins() {
    let db = open_db();
    let ks = db.register_keyspace("versions").expect("register");
    ks.put_columns(
        b"t",
        b"k",
        vec![Column::with_timestamp(b"c".to_vec(), b"old".to_vec(), 1_000)],
    )
    .expect("put old");
    ks.put_columns(
        b"t",
        b"k",
        vec![Column::with_timestamp(b"c".to_vec(), b"new".to_vec(), 2_000)],
    )
    .expect("put new");

    let column = ks.get_column(b"t", b"k", b"c").expect("get").expect("present");
    assert_eq!(column.value, b"new");
    assert_eq!(column.timestamp, Timestamp::At(2_000));

    // Slices also surface a single, newest version.
    let (_, slices) = ks
        .get_slice(b"t", KeyRange::all(), ColumnRange::All, 10, 10)
        .expect("slice");
    assert_eq!(slices.len(), 1);
    assert_eq!(slices[0].columns.len(), 1);
    assert_eq!(slices[0].columns[0].value, b"new");
}

#[test]
fn delete_key_removes_every_column() {
    let db = open_db();
    let ks = db.register_keyspace("del").expect("register");
    ks.put_columns(b"t", b"k", vec![col("a", "1"), col("b", "2")])
        .expect("put");
    assert!(ks.exists_key(b"t", b"k").expect("exists"));

    ks.delete_key(b"t", b"k").expect("delete");
    assert!(!ks.exists_key(b"t", b"k").expect("exists"));
    assert_eq!(ks.get_column(b"t", b"k", b"a").expect("get"), None);
    let (_, slices) = ks
        .get_slice(b"t", KeyRange::all(), ColumnRange::All, 10, 10)
        .expect("slice");
    assert!(slices.is_empty());
}

#[test]
fn partial_column_delete_leaves_the_rest() {
    let db = open_db();
    let ks = db.register_keyspace("partial").expect("register");
    ks.put_columns(b"t", b"k", vec![col("a", "1"), col("b", "2"), col("c", "3")])
        .expect("put");
    ks.delete_columns(b"t", b"k", &[b"b".to_vec()]).expect("delete");

    let (_, slices) = ks
        .get_slice(b"t", KeyRange::all(), ColumnRange::All, 10, 10)
        .expect("slice");
    assert_eq!(slice_names(&slices[0]), vec![b"a".to_vec(), b"c".to_vec()]);
    assert!(ks.exists_key(b"t", b"k").expect("exists"));
}

#[test]
fn slice_over_key_range_is_half_open_and_ordered() {
    let db = open_db();
    let ks = db.register_keyspace("range").expect("register");
    for key in [b"a".as_slice(), b"b", b"c", b"d"] {
        ks.put_columns(b"t", key, vec![col("c", "v")]).expect("put");
    }

    let (last_key, slices) = ks
        .get_slice(
            b"t",
            KeyRange::range(Some(b"b".to_vec()), Some(b"d".to_vec())),
            ColumnRange::All,
            10,
            10,
        )
        .expect("slice");
    let keys: Vec<Vec<u8>> = slices.iter().map(|s| s.key.clone()).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(last_key, Some(b"c".to_vec()));
}

#[test]
fn slice_respects_max_keys_and_max_columns() {
    let db = open_db();
    let ks = db.register_keyspace("budget").expect("register");
    for key in [b"a".as_slice(), b"b", b"c"] {
        ks.put_columns(
            b"t",
            key,
            (0..6).map(|i| Column::new(vec![b'c', i], vec![i])).collect(),
        )
        .expect("put");
    }

    let (_, slices) = ks
        .get_slice(b"t", KeyRange::all(), ColumnRange::All, 2, 4)
        .expect("slice");
    assert_eq!(slices.len(), 2);
    for slice in &slices {
        assert_eq!(slice.columns.len(), 4);
        assert_eq!(slice.last_column, slice.columns[3].name);
    }
}

#[test]
fn slice_with_explicit_keys_skips_missing_and_deleted() {
    let db = open_db();
    let ks = db.register_keyspace("keys").expect("register");
    ks.put_columns(b"t", b"a", vec![col("c", "1")]).expect("put");
    ks.put_columns(b"t", b"b", vec![col("c", "2")]).expect("put");

    let result = ks.read_committed_transaction(|tx| {
        tx.delete_key(b"t", b"b")?;
        tx.get_slice(
            b"t",
            KeyRange::keys([b"a".to_vec(), b"b".to_vec(), b"zz".to_vec()]),
            ColumnRange::All,
            10,
            10,
        )
    });
    let (_, slices) = result.expect("slice");
    assert_eq!(slices.len(), 1);
    assert_eq!(slices[0].key, b"a");
}

#[test]
fn column_range_selects_half_open_window_and_reverse_flips_order() {
    let db = open_db();
    let ks = db.register_keyspace("colrange").expect("register");
    ks.put_columns(
        b"t",
        b"k",
        vec![col("a", "1"), col("b", "2"), col("c", "3"), col("d", "4")],
    )
    .expect("put");

    let (_, slices) = ks
        .get_slice(
            b"t",
            KeyRange::all(),
            ColumnRange::Range {
                first: Some(b"b".to_vec()),
                up_to: Some(b"d".to_vec()),
                reverse: false,
            },
            10,
            10,
        )
        .expect("slice");
    assert_eq!(slice_names(&slices[0]), vec![b"b".to_vec(), b"c".to_vec()]);

    let (_, slices) = ks
        .get_slice(
            b"t",
            KeyRange::all(),
            ColumnRange::Range {
                first: None,
                up_to: None,
                reverse: true,
            },
            10,
            2,
        )
        .expect("slice");
    // Reverse keeps the tail of the selection, emitted descending.
    assert_eq!(slice_names(&slices[0]), vec![b"d".to_vec(), b"c".to_vec()]);
}

#[test]
fn get_slice_values_projects_fixed_columns() {
    let db = open_db();
    let ks = db.register_keyspace("proj").expect("register");
    ks.put_columns(b"t", b"k1", vec![col("a", "1"), col("b", "2")])
        .expect("put");
    ks.put_columns(b"t", b"k2", vec![col("b", "3")]).expect("put");

    let (_, rows) = ks
        .get_slice_values(
            b"t",
            KeyRange::all(),
            vec![b"a".to_vec(), b"b".to_vec()],
            10,
        )
        .expect("values");
    assert_eq!(
        rows,
        vec![
            (b"k1".to_vec(), vec![Some(b"1".to_vec()), Some(b"2".to_vec())]),
            (b"k2".to_vec(), vec![None, Some(b"3".to_vec())]),
        ]
    );
}

#[test]
fn count_keys_tracks_inserts_and_tombstones() {
    let db = open_db();
    let ks = db.register_keyspace("count").expect("register");
    for key in [b"a".as_slice(), b"b", b"c"] {
        ks.put_columns(b"t", key, vec![col("c", "v")]).expect("put");
    }
    assert_eq!(ks.count_keys(b"t", KeyRange::all()).expect("count"), 3);

    let counted = ks.read_committed_transaction(|tx| {
        tx.delete_key(b"t", b"b")?;
        tx.count_keys(b"t", KeyRange::all())
    });
    assert_eq!(counted.expect("count"), 2);

    // Uncommitted inserts in range are counted once.
    let counted = ks.read_committed_transaction(|tx| {
        tx.put_columns(b"t", b"d", vec![col("c", "v")])?;
        tx.put_columns(b"t", b"a", vec![col("c2", "v2")])?;
        tx.count_keys(b"t", KeyRange::all())
    });
    assert_eq!(counted.expect("count"), 4);
}

#[test]
fn list_tables_ascending_and_empty_keyspace_is_empty() {
    let db = open_db();
    let ks = db.register_keyspace("tables").expect("register");
    assert!(ks.list_tables().expect("list").is_empty());

    for table in [b"zebra".as_slice(), b"alpha", b"mid"] {
        ks.put_columns(table, b"k", vec![col("c", "v")]).expect("put");
    }
    assert_eq!(
        ks.list_tables().expect("list"),
        vec![b"alpha".to_vec(), b"mid".to_vec(), b"zebra".to_vec()]
    );

    // Tables disappear once their last datum is deleted.
    ks.delete_key(b"mid", b"k").expect("delete");
    assert_eq!(
        ks.list_tables().expect("list"),
        vec![b"alpha".to_vec(), b"zebra".to_vec()]
    );
}

#[test]
fn keyspaces_do_not_leak_into_each_other() {
    let db = open_db();
    let ks1 = db.register_keyspace("one").expect("register");
    let ks2 = db.register_keyspace("two").expect("register");
    ks1.put_columns(b"t", b"k", vec![col("c", "1")]).expect("put");
    ks2.put_columns(b"t", b"k", vec![col("c", "2")]).expect("put");

    assert_eq!(
        ks1.get_column(b"t", b"k", b"c").expect("get").expect("v").value,
        b"1"
    );
    assert_eq!(
        ks2.get_column(b"t", b"k", b"c").expect("get").expect("v").value,
        b"2"
    );
    ks1.delete_key(b"t", b"k").expect("delete");
    assert!(ks2.exists_key(b"t", b"k").expect("exists"));
}

#[test]
fn table_stats_report_size_and_count() {
    let db = open_db();
    let ks = db.register_keyspace("stats").expect("register");
    for i in 0..10u8 {
        ks.put_columns(b"t", &[b'k', i], vec![col("c", "value-bytes")])
            .expect("put");
    }
    let stats = ks.table_stats(b"t").expect("stats");
    assert_eq!(stats.key_count, 10);
    assert!(stats.approximate_bytes > 0);
}

#[test]
fn read_only_transactions_reject_writes() {
    let db = open_db();
    let ks = db.register_keyspace("ro").expect("register");
    ks.put_columns(b"t", b"k", vec![col("c", "v")]).expect("put");

    let err = ks
        .read_only_transaction(|tx| tx.put_columns(b"t", b"k", vec![col("c", "w")]))
        .expect_err("read-only");
    assert_eq!(err.code(), StrataErrorCode::ReadOnlyViolation);

    // Reads still work.
    let value = ks
        .read_only_transaction(|tx| tx.get_column_values(b"t", b"k", &[b"c".to_vec()]))
        .expect("read");
    assert_eq!(value, vec![Some(b"v".to_vec())]);
}

#[test]
fn wide_rows_page_through_columns_with_last_column_cursor() {
    let db = open_db();
    let ks = db.register_keyspace("wide").expect("register");
    let total = 120u8;
    ks.put_columns(
        b"t",
        b"row",
        (0..total).map(|i| Column::new(vec![b'c', i], vec![i])).collect(),
    )
    .expect("put");

    // Page through the row via column-range bounds.
    let mut seen = Vec::new();
    let mut first: Option<Vec<u8>> = None;
    loop {
        let (_, slices) = ks
            .get_slice(
                b"t",
                KeyRange::all(),
                ColumnRange::Range {
                    first: first.clone(),
                    up_to: None,
                    reverse: false,
                },
                1,
                50,
            )
            .expect("slice");
        let Some(slice) = slices.into_iter().next() else {
            break;
        };
        seen.extend(slice.columns.iter().map(|c| c.name.clone()));
        if slice.columns.len() < 50 {
            break;
        }
        let mut next = slice.last_column.clone();
        next.push(0);
        first = Some(next);
    }
    assert_eq!(seen.len(), total as usize);
    let expected: Vec<Vec<u8>> = (0..total).map(|i| vec![b'c', i]).collect();
    assert_eq!(seen, expected);
}

#[test]
fn notifications_fire_after_commit_only() {
    let db = open_db();
    let ks = db.register_keyspace("notif").expect("register");
    let stream = ks.listen("orders");

    let _ = ks.read_committed_transaction(|tx| {
        tx.notify("orders");
        tx.put_columns(b"t", b"k", vec![col("c", "v")])
    });
    assert_eq!(stream.recv().as_deref(), Some("orders"));

    let err: Result<(), StrataError> = ks.read_committed_transaction(|tx| {
        tx.notify("orders");
        Err(StrataError::Storage("forced failure".into()))
    });
    assert!(err.is_err());
    assert_eq!(stream.try_recv(), None);
}
