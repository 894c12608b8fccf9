use chrono::{NaiveDate, NaiveTime};
use serde_json::{Value, json};
use tempfile::tempdir;
use tl_store::{ParquetStore, TableStore, UpsertOutcome};
use tl_transform::ExtractionStamp;
use tl_types::{DType, Scalar};
use transitlake::pipeline::{
    BRONZE_POSITIONS, SILVER_POSITIONS, SILVER_STOP_ROUTES, SILVER_STOPS, ingest_bronze_positions,
    ingest_bronze_stops, run_silver,
};

fn stop_records() -> Vec<Value> {
    vec![
        json!({
            "StopID": "1001",
            "Name": "K ST NW + 9TH ST NW",
            "Lat": 38.902,
            "Lon": -77.024,
            "Routes": ["10A", "33"]
        }),
        json!({
            "StopID": "1002",
            "Name": "M ST NE + 4TH ST NE",
            "Lat": 38.905,
            "Lon": -77.001,
            "Routes": ["33"]
        }),
        // Upstream occasionally repeats a stop; silver keeps the first.
        json!({
            "StopID": "1001",
            "Name": "K ST NW + 9TH ST NW (DUP)",
            "Lat": 38.902,
            "Lon": -77.024,
            "Routes": ["10A"]
        }),
    ]
}

fn position_records() -> Vec<Value> {
    vec![
        json!({
            "VehicleID": 71,
            "TripID": 100123,
            "DirectionNum": 0,
            "DirectionText": "NORTH",
            "DateTime": "2024-06-17T13:52:09",
            "TripStartTime": "2024-06-17T13:30:00",
            "TripEndTime": "2024-06-17T14:30:00",
            "BlockNumber": "70",
            "Deviation": 2.5
        }),
        json!({
            "VehicleID": 84,
            "TripID": 100124,
            "DirectionNum": 1,
            "DirectionText": "SOUTH",
            "DateTime": "2024-06-17T13:52:11",
            "TripStartTime": "2024-06-17T13:45:00",
            "TripEndTime": "2024-06-17T14:45:00",
            "BlockNumber": null,
            "Deviation": -1.0
        }),
        json!({
            "VehicleID": 71,
            "TripID": 100123,
            "DirectionNum": 0,
            "DirectionText": "NORTH",
            "DateTime": "2024-06-17T13:52:09",
            "TripStartTime": "2024-06-17T13:30:00",
            "TripEndTime": "2024-06-17T14:30:00",
            "BlockNumber": "70",
            "Deviation": 2.5
        }),
    ]
}

fn stamp() -> ExtractionStamp {
    ExtractionStamp::new(
        NaiveDate::from_ymd_opt(2024, 6, 17).expect("date"),
        NaiveTime::from_hms_opt(13, 52, 9).expect("time"),
    )
}

fn land_bronze(store: &ParquetStore) {
    ingest_bronze_stops(store, &stop_records()).expect("bronze stops");
    ingest_bronze_positions(store, &position_records(), &stamp()).expect("bronze positions");
}

#[test]
fn bronze_to_silver_end_to_end() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    land_bronze(&store);
    run_silver(&store).expect("silver");

    let stops = store.read(SILVER_STOPS).expect("silver stops");
    assert_eq!(stops.n_rows(), 2);
    assert_eq!(stops.column("StopID").expect("ids").dtype(), &DType::Int32);
    assert!(stops.column("Routes").is_none());
    assert_eq!(
        stops.column("Stop_Name").expect("names").values()[0],
        Scalar::Utf8("K ST NW + 9TH ST NW".to_owned())
    );

    let routes = store.read(SILVER_STOP_ROUTES).expect("routes");
    assert_eq!(routes.n_rows(), 3);
    assert_eq!(routes.names(), &["StopID".to_owned(), "Routes".to_owned()]);
    assert_eq!(routes.column("Routes").expect("routes").dtype(), &DType::Utf8);

    let positions = store.read(SILVER_POSITIONS).expect("silver positions");
    assert_eq!(positions.n_rows(), 2);
    assert_eq!(
        positions.column("VehicleID").expect("ids").dtype(),
        &DType::Int16
    );
    assert_eq!(
        positions.column("DirectionText").expect("dir").dtype(),
        &DType::Categorical
    );
    assert_eq!(
        positions.column("DateTime").expect("dt").dtype(),
        &DType::Timestamp
    );

    let by_vehicle = positions.column("VehicleID").expect("ids").values();
    let blocks = positions.column("BlockNumber").expect("blocks").values();
    for (vehicle, block) in by_vehicle.iter().zip(blocks) {
        match vehicle {
            Scalar::Int16(84) => assert_eq!(block, &Scalar::Utf8("Null".to_owned())),
            Scalar::Int16(71) => assert_eq!(block, &Scalar::Utf8("70".to_owned())),
            other => panic!("unexpected vehicle {other:?}"),
        }
    }
}

#[test]
fn bronze_positions_are_partitioned_by_extraction_stamp() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    ingest_bronze_positions(&store, &position_records(), &stamp()).expect("bronze positions");

    let partition = lake
        .path()
        .join(BRONZE_POSITIONS)
        .join("fecha_consulta=2024-06-17")
        .join("hora_consulta=13:52:09");
    assert!(partition.is_dir());

    let bronze = store.read(BRONZE_POSITIONS).expect("read");
    assert_eq!(bronze.n_rows(), 3);
    assert_eq!(
        bronze.column("fecha_consulta").expect("fecha").dtype(),
        &DType::Date
    );
}

#[test]
fn repeated_bronze_ingestion_inserts_no_duplicates() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    let first = ingest_bronze_stops(&store, &stop_records()).expect("first");
    assert_eq!(first, UpsertOutcome::InitialLoad { rows: 3 });

    let second = ingest_bronze_stops(&store, &stop_records()).expect("second");
    assert_eq!(second, UpsertOutcome::Merged { inserted: 0 });
}

#[test]
fn repeated_silver_runs_are_idempotent() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    land_bronze(&store);
    run_silver(&store).expect("first silver");
    let stops_before = store.read(SILVER_STOPS).expect("stops");
    let routes_before = store.read(SILVER_STOP_ROUTES).expect("routes");

    run_silver(&store).expect("second silver");
    let stops_after = store.read(SILVER_STOPS).expect("stops");
    let routes_after = store.read(SILVER_STOP_ROUTES).expect("routes");

    assert!(stops_after.semantic_eq(&stops_before));
    assert!(routes_after.semantic_eq(&routes_before));
}

#[test]
fn silver_requires_bronze_to_exist() {
    let lake = tempdir().expect("tempdir");
    let store = ParquetStore::new(lake.path());

    run_silver(&store).expect_err("no bronze tables yet");
}
