use stratadb::{
    Column, ColumnRange, KeyRange, StrataConfig, StrataDb, StrataError, StrataErrorCode,
};

fn open_db() -> StrataDb {
    StrataDb::in_memory(StrataConfig::development()).expect("open")
}

fn col(name: &str, value: &str) -> Column {
    Column::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
}

#[test]
fn repeatable_read_pins_the_snapshot() {
    let db = open_db();
    let ks = db.register_keyspace("rr").expect("register");
    let writer = ks.clone();
    ks.put_columns(b"t", b"k", vec![col("c", "before")]).expect("put");

    ks.repeatable_read_transaction(|tx| {
        let first = tx.get_slice(b"t", KeyRange::all(), ColumnRange::All, 10, 10)?;
        // Another session commits mid-transaction.
        writer
            .put_columns(b"t", b"k", vec![col("c", "after")])
            .expect("external commit");
        writer
            .put_columns(b"t", b"k2", vec![col("c", "new key")])
            .expect("external commit");
        let second = tx.get_slice(b"t", KeyRange::all(), ColumnRange::All, 10, 10)?;
        assert_eq!(first, second);
        assert_eq!(second.1.len(), 1);
        assert_eq!(second.1[0].columns[0].value, b"before");
        Ok(())
    })
    .expect("transaction");

    // Outside the transaction the external writes are visible.
    let column = ks.get_column(b"t", b"k", b"c").expect("get").expect("present");
    assert_eq!(column.value, b"after");
}

#[test]
fn read_committed_observes_external_commits() {
    let db = open_db();
    let ks = db.register_keyspace("rc").expect("register");
    let writer = ks.clone();
    ks.put_columns(b"t", b"k", vec![col("c", "before")]).expect("put");

    ks.read_committed_transaction(|tx| {
        let before = tx.get_column(b"t", b"k", b"c")?.expect("present");
        assert_eq!(before.value, b"before");
        writer
            .put_columns(b"t", b"k", vec![col("c", "after")])
            .expect("external commit");
        let after = tx.get_column(b"t", b"k", b"c")?.expect("present");
        assert_eq!(after.value, b"after");
        Ok(())
    })
    .expect("transaction");
}

#[test]
fn uncommitted_writes_are_visible_to_the_issuing_transaction_only() {
    let db = open_db();
    let ks = db.register_keyspace("vis").expect("register");
    let outside = ks.clone();

    ks.read_committed_transaction(|tx| {
        tx.put_columns(b"t", b"k", vec![col("c", "pending")])?;
        let inside = tx.get_column(b"t", b"k", b"c")?.expect("visible inside");
        assert_eq!(inside.value, b"pending");
        // Not yet committed: invisible to other sessions.
        assert_eq!(outside.get_column(b"t", b"k", b"c").expect("get"), None);
        assert!(!outside.exists_key(b"t", b"k").expect("exists"));
        Ok(())
    })
    .expect("transaction");

    assert!(outside.exists_key(b"t", b"k").expect("exists after commit"));
}

#[test]
fn deletes_inside_a_transaction_shadow_the_store() {
    let db = open_db();
    let ks = db.register_keyspace("shadow").expect("register");
    ks.put_columns(b"t", b"k", vec![col("a", "1"), col("b", "2")])
        .expect("put");

    ks.read_committed_transaction(|tx| {
        tx.delete_columns(b"t", b"k", &[b"a".to_vec()])?;
        assert_eq!(tx.get_column(b"t", b"k", b"a")?, None);
        assert!(tx.get_column(b"t", b"k", b"b")?.is_some());
        // Re-adding the column clears its tombstone.
        tx.put_columns(b"t", b"k", vec![col("a", "3")])?;
        assert_eq!(tx.get_column(b"t", b"k", b"a")?.expect("present").value, b"3");
        Ok(())
    })
    .expect("transaction");

    let column = ks.get_column(b"t", b"k", b"a").expect("get").expect("present");
    assert_eq!(column.value, b"3");
}

#[test]
fn nested_transaction_writes_surface_in_the_outer_commit() {
    let db = open_db();
    let ks = db.register_keyspace("nested").expect("register");

    ks.read_committed_transaction(|tx| {
        tx.put_columns(b"t", b"k1", vec![col("c", "1")])?;
        tx.nested(|inner| {
            inner.put_columns(b"t", b"k1", vec![col("c", "2")])?;
            // The child sees shared state, including its own write.
            assert_eq!(
                inner.get_column(b"t", b"k1", b"c")?.expect("present").value,
                b"2"
            );
            Ok(())
        })?;
        // The parent observes the child's write immediately.
        assert_eq!(tx.get_column(b"t", b"k1", b"c")?.expect("present").value, b"2");
        Ok(())
    })
    .expect("transaction");

    let column = ks
        .get_column(b"t", b"k1", b"c")
        .expect("get")
        .expect("present");
    assert_eq!(column.value, b"2");
}

#[test]
fn nested_failure_aborts_the_whole_transaction() {
    let db = open_db();
    let ks = db.register_keyspace("nested_abort").expect("register");

    let result: Result<(), StrataError> = ks.read_committed_transaction(|tx| {
        tx.put_columns(b"t", b"outer", vec![col("c", "1")])?;
        tx.nested(|inner| {
            inner.put_columns(b"t", b"inner", vec![col("c", "2")])?;
            Err(StrataError::Storage("inner failure".into()))
        })
    });
    let err = result.expect_err("aborted");
    assert_eq!(err.code(), StrataErrorCode::TransactionAborted);

    // Nothing from either level was committed.
    assert!(!ks.exists_key(b"t", b"outer").expect("exists"));
    assert!(!ks.exists_key(b"t", b"inner").expect("exists"));
}

#[test]
fn abort_discards_overlays_and_later_transactions_start_clean() {
    let db = open_db();
    let ks = db.register_keyspace("abort").expect("register");
    ks.put_columns(b"t", b"k", vec![col("c", "committed")])
        .expect("put");

    let result: Result<(), StrataError> = ks.read_committed_transaction(|tx| {
        tx.put_columns(b"t", b"k", vec![col("c", "doomed")])?;
        tx.delete_key(b"t", b"k")?;
        Err(StrataError::Storage("boom".into()))
    });
    assert!(result.is_err());

    let column = ks.get_column(b"t", b"k", b"c").expect("get").expect("present");
    assert_eq!(column.value, b"committed");
}

#[test]
fn logical_errors_pass_through_without_abort_wrapping() {
    let db = open_db();
    let ks = db.register_keyspace("logical").expect("register");
    let result: Result<(), StrataError> = ks.read_committed_transaction(|_tx| {
        Err(StrataError::UnknownKeyspace("phantom".into()))
    });
    let err = result.expect_err("propagated");
    assert_eq!(err.code(), StrataErrorCode::UnknownKeyspace);
}

#[test]
fn last_writer_wins_at_column_level() {
    let db = open_db();
    let ks = db.register_keyspace("lww").expect("register");
    let other = ks.clone();

    // Two sessions write disjoint and overlapping columns; the later
    // commit wins only where they overlap.
    ks.read_committed_transaction(|tx| {
        tx.put_columns(b"t", b"k", vec![col("shared", "first"), col("mine", "1")])
    })
    .expect("first commit");
    other
        .read_committed_transaction(|tx| {
            tx.put_columns(b"t", b"k", vec![col("shared", "second"), col("theirs", "2")])
        })
        .expect("second commit");

    let values = ks
        .get_column_values(
            b"t",
            b"k",
            &[b"shared".to_vec(), b"mine".to_vec(), b"theirs".to_vec()],
        )
        .expect("get");
    assert_eq!(
        values,
        vec![
            Some(b"second".to_vec()),
            Some(b"1".to_vec()),
            Some(b"2".to_vec()),
        ]
    );
}

#[test]
fn repeatable_read_snapshot_spans_many_scans() {
    let db = open_db();
    let ks = db.register_keyspace("pool").expect("register");
    let writer = ks.clone();
    for i in 0..50u8 {
        ks.put_columns(b"t", &[b'k', i], vec![col("c", "v")]).expect("put");
    }

    // More scans than the development pool capacity, interleaved with
    // external writes; every scan must agree.
    ks.repeatable_read_transaction(|tx| {
        for round in 0..40u8 {
            writer
                .put_columns(b"t", &[b'x', round], vec![col("c", "noise")])
                .expect("external");
            assert_eq!(tx.count_keys(b"t", KeyRange::all())?, 50);
        }
        Ok(())
    })
    .expect("transaction");

    assert_eq!(ks.count_keys(b"t", KeyRange::all()).expect("count"), 90);
}
