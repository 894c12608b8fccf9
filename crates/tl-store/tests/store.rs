use tempfile::tempdir;
use tl_columnar::Column;
use tl_frame::Table;
use tl_store::{MergePredicate, ParquetStore, StoreError, TableStore, UpsertOutcome, WriteMode, upsert};
use tl_types::{DType, NullKind, Scalar};

fn stops(rows: &[(i32, &str)]) -> Table {
    Table::new(vec![
        (
            "StopID".to_owned(),
            Column::new(
                DType::Int32,
                rows.iter().map(|(id, _)| Scalar::Int32(*id)).collect(),
            )
            .expect("ids"),
        ),
        (
            "Stop_Name".to_owned(),
            Column::new(
                DType::Utf8,
                rows.iter()
                    .map(|(_, name)| Scalar::Utf8((*name).to_owned()))
                    .collect(),
            )
            .expect("names"),
        ),
    ])
    .expect("table")
}

fn positions(rows: &[(i16, &str, &str)]) -> Table {
    Table::new(vec![
        (
            "VehicleID".to_owned(),
            Column::new(
                DType::Int16,
                rows.iter().map(|(id, _, _)| Scalar::Int16(*id)).collect(),
            )
            .expect("ids"),
        ),
        (
            "fecha_consulta".to_owned(),
            Column::new(
                DType::Utf8,
                rows.iter()
                    .map(|(_, date, _)| Scalar::Utf8((*date).to_owned()))
                    .collect(),
            )
            .expect("dates"),
        ),
        (
            "hora_consulta".to_owned(),
            Column::new(
                DType::Utf8,
                rows.iter()
                    .map(|(_, _, time)| Scalar::Utf8((*time).to_owned()))
                    .collect(),
            )
            .expect("times"),
        ),
    ])
    .expect("table")
}

#[test]
fn upsert_against_missing_table_equals_full_write() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let table = stops(&[(1, "K ST"), (2, "M ST")]);

    let outcome = upsert(&store, &table, "silver/a", &MergePredicate::key("StopID"), &[])
        .expect("upsert");
    assert_eq!(outcome, UpsertOutcome::InitialLoad { rows: 2 });

    store
        .write_full(&table, "silver/b", WriteMode::Overwrite, &[])
        .expect("full write");

    let via_upsert = store.read("silver/a").expect("read a");
    let via_full = store.read("silver/b").expect("read b");
    assert!(via_upsert.semantic_eq(&via_full));
}

#[test]
fn upsert_is_idempotent() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let predicate = MergePredicate::key("StopID");
    let table = stops(&[(1, "K ST"), (2, "M ST")]);

    upsert(&store, &table, "silver/stops", &predicate, &[]).expect("first");
    let second = upsert(&store, &table, "silver/stops", &predicate, &[]).expect("second");
    assert_eq!(second, UpsertOutcome::Merged { inserted: 0 });

    let read = store.read("silver/stops").expect("read");
    assert_eq!(read.n_rows(), 2);
}

#[test]
fn merge_never_updates_existing_rows() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let predicate = MergePredicate::key("StopID");

    store
        .write_full(&stops(&[(1, "A")]), "silver/stops", WriteMode::Overwrite, &[])
        .expect("seed");
    let inserted = store
        .merge_insert_only(&stops(&[(1, "B"), (2, "C")]), "silver/stops", &predicate)
        .expect("merge");
    assert_eq!(inserted, 1);

    let read = store.read("silver/stops").expect("read");
    assert_eq!(read.n_rows(), 2);
    let names: Vec<&Scalar> = read.column("Stop_Name").expect("names").values().iter().collect();
    assert!(names.contains(&&Scalar::Utf8("A".to_owned())));
    assert!(names.contains(&&Scalar::Utf8("C".to_owned())));
    assert!(!names.contains(&&Scalar::Utf8("B".to_owned())));
}

#[test]
fn merge_inserts_duplicate_source_keys_once() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let predicate = MergePredicate::key("StopID");

    store
        .write_full(&stops(&[(1, "A")]), "silver/stops", WriteMode::Overwrite, &[])
        .expect("seed");
    let inserted = store
        .merge_insert_only(
            &stops(&[(2, "C"), (2, "C2"), (3, "D")]),
            "silver/stops",
            &predicate,
        )
        .expect("merge");
    assert_eq!(inserted, 2);
    assert_eq!(store.read("silver/stops").expect("read").n_rows(), 3);
}

#[test]
fn merge_with_multi_column_predicate() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let predicate = MergePredicate::parse(
        "target.StopID = source.StopID AND target.Stop_Name = source.Stop_Name",
    )
    .expect("predicate");

    store
        .write_full(&stops(&[(1, "10A")]), "silver/routes", WriteMode::Overwrite, &[])
        .expect("seed");
    let inserted = store
        .merge_insert_only(&stops(&[(1, "10A"), (1, "33")]), "silver/routes", &predicate)
        .expect("merge");
    assert_eq!(inserted, 1);
}

#[test]
fn merge_errors_do_not_fall_back() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    store
        .write_full(&stops(&[(1, "A")]), "silver/stops", WriteMode::Overwrite, &[])
        .expect("seed");

    let err = upsert(
        &store,
        &stops(&[(2, "B")]),
        "silver/stops",
        &MergePredicate::key("Nope"),
        &[],
    )
    .expect_err("missing key column must propagate");
    assert!(matches!(err, StoreError::MissingKeyColumn { .. }));

    // The failed call must not have touched the table.
    assert_eq!(store.read("silver/stops").expect("read").n_rows(), 1);
}

#[test]
fn partitioned_round_trip_preserves_rows() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let table = positions(&[
        (1, "2024-06-17", "13:00:00"),
        (2, "2024-06-17", "13:30:00"),
        (3, "2024-06-18", "13:00:00"),
    ]);

    store
        .write_full(
            &table,
            "bronze/bus_position",
            WriteMode::Overwrite,
            &["fecha_consulta", "hora_consulta"],
        )
        .expect("write");

    let dir = lake.path().join("bronze/bus_position");
    assert!(dir.join("fecha_consulta=2024-06-17/hora_consulta=13:00:00").is_dir());

    let read = store.read("bronze/bus_position").expect("read");
    assert!(
        read.semantic_eq_unordered(&table, &["VehicleID"])
            .expect("comparable")
    );
}

#[test]
fn append_mode_extends_without_rewriting() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    store
        .write_full(&stops(&[(1, "A")]), "bronze/stops", WriteMode::Overwrite, &[])
        .expect("seed");
    store
        .write_full(&stops(&[(2, "B")]), "bronze/stops", WriteMode::Append, &[])
        .expect("append");

    let read = store.read("bronze/stops").expect("read");
    assert_eq!(read.n_rows(), 2);
}

#[test]
fn append_rejects_schema_drift() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    store
        .write_full(&stops(&[(1, "A")]), "bronze/stops", WriteMode::Overwrite, &[])
        .expect("seed");

    let drifted = Table::new(vec![(
        "StopID".to_owned(),
        Column::new(DType::Int32, vec![Scalar::Int32(9)]).expect("column"),
    )])
    .expect("table");

    let err = store
        .write_full(&drifted, "bronze/stops", WriteMode::Append, &[])
        .expect_err("schema drift");
    assert!(matches!(err, StoreError::SchemaMismatch { .. }));
}

#[test]
fn fail_and_noop_modes_respect_existing_tables() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());
    let table = stops(&[(1, "A")]);

    store
        .write_full(&table, "bronze/stops", WriteMode::FailIfExists, &[])
        .expect("first write");
    let err = store
        .write_full(&table, "bronze/stops", WriteMode::FailIfExists, &[])
        .expect_err("exists");
    assert!(matches!(err, StoreError::TableExists { .. }));

    store
        .write_full(&stops(&[(2, "B")]), "bronze/stops", WriteMode::NoOpIfExists, &[])
        .expect("noop");
    assert_eq!(store.read("bronze/stops").expect("read").n_rows(), 1);
}

#[test]
fn logical_schema_survives_a_round_trip() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    let table = Table::new(vec![
        (
            "DirectionText".to_owned(),
            Column::new(
                DType::Categorical,
                vec![
                    Scalar::Categorical("NORTH".to_owned()),
                    Scalar::Categorical("SOUTH".to_owned()),
                ],
            )
            .expect("directions"),
        ),
        (
            "DirectionNum".to_owned(),
            Column::new(DType::Int8, vec![Scalar::Int8(0), Scalar::Int8(1)]).expect("nums"),
        ),
        (
            "BlockNumber".to_owned(),
            Column::new(
                DType::Utf8,
                vec![Scalar::Null(NullKind::Null), Scalar::Utf8("70".to_owned())],
            )
            .expect("blocks"),
        ),
    ])
    .expect("table");

    store
        .write_full(&table, "silver/positions", WriteMode::Overwrite, &[])
        .expect("write");
    let read = store.read("silver/positions").expect("read");

    assert_eq!(
        read.column("DirectionText").expect("col").dtype(),
        &DType::Categorical
    );
    assert_eq!(read.column("DirectionNum").expect("col").dtype(), &DType::Int8);
    assert!(read.semantic_eq(&table));
}

#[test]
fn overwrite_replaces_all_prior_data() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    store
        .write_full(&stops(&[(1, "A"), (2, "B")]), "bronze/stops", WriteMode::Overwrite, &[])
        .expect("first");
    store
        .write_full(&stops(&[(3, "C")]), "bronze/stops", WriteMode::Overwrite, &[])
        .expect("second");

    let read = store.read("bronze/stops").expect("read");
    assert_eq!(read.n_rows(), 1);
    assert_eq!(
        read.column("StopID").expect("ids").values(),
        &[Scalar::Int32(3)]
    );
}

#[test]
fn locations_outside_the_lake_are_rejected() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    let err = store.read("../escape").expect_err("must reject");
    assert!(matches!(err, StoreError::InvalidLocation { .. }));
    assert!(!store.exists("../escape"));
}
