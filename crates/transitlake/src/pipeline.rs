use serde_json::Value;
use thiserror::Error;
use tl_client::ApiClient;
use tl_frame::FrameError;
use tl_store::{MergePredicate, ParquetStore, StoreError, TableStore, UpsertOutcome, WriteMode, upsert};
use tl_transform::{ExtractionStamp, TransformError, decode_list_column, explode, normalize, normalize_incremental};
use tl_types::{DType, Scalar};
use tracing::info;

use crate::config::PipelineConfig;

pub const STOPS_ENDPOINT: &str = "jStops";
pub const STOPS_FIELD: &str = "Stops";
pub const POSITIONS_ENDPOINT: &str = "jBusPositions";
pub const POSITIONS_FIELD: &str = "BusPositions";

pub const BRONZE_STOPS: &str = "bronze/stop_search";
pub const BRONZE_POSITIONS: &str = "bronze/bus_position";
pub const SILVER_STOPS: &str = "silver/stop_search";
pub const SILVER_POSITIONS: &str = "silver/bus_position";
pub const SILVER_STOP_ROUTES: &str = "silver/stop_search_routes";

const POSITION_PARTITION_KEYS: [&str; 2] = ["fecha_consulta", "hora_consulta"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Land raw stop metadata in the bronze layer: new stops are merged in
/// by `StopID`, existing rows stay untouched.
pub fn ingest_bronze_stops(
    store: &dyn TableStore,
    records: &[Value],
) -> Result<UpsertOutcome, PipelineError> {
    let table = normalize(records)?;
    let outcome = upsert(
        store,
        &table,
        BRONZE_STOPS,
        &MergePredicate::key("StopID"),
        &[],
    )?;
    info!(rows = table.n_rows(), ?outcome, "bronze stops landed");
    Ok(outcome)
}

/// Land one point-in-time snapshot of vehicle positions in the bronze
/// layer, stamped and partitioned by extraction date and time.
pub fn ingest_bronze_positions(
    store: &dyn TableStore,
    records: &[Value],
    stamp: &ExtractionStamp,
) -> Result<(), PipelineError> {
    let table = normalize_incremental(records, stamp)?;
    store.write_full(
        &table,
        BRONZE_POSITIONS,
        WriteMode::default(),
        &POSITION_PARTITION_KEYS,
    )?;
    info!(rows = table.n_rows(), "bronze positions landed");
    Ok(())
}

/// Bronze stage: fetch both feeds and land whatever arrived. A failed
/// fetch skips that feed; it does not abort the other.
pub fn run_bronze(
    client: &ApiClient,
    store: &dyn TableStore,
    stamp: &ExtractionStamp,
) -> Result<(), PipelineError> {
    if let Some(records) = client.fetch_records_logged(STOPS_ENDPOINT, STOPS_FIELD, &[]) {
        ingest_bronze_stops(store, &records)?;
    }
    if let Some(records) = client.fetch_records_logged(POSITIONS_ENDPOINT, POSITIONS_FIELD, &[]) {
        ingest_bronze_positions(store, &records, stamp)?;
    }
    Ok(())
}

/// Silver stops: typed, deduplicated, renamed, and with the multivalued
/// `Routes` column normalized out into its own keyed table.
pub fn refine_stops(store: &dyn TableStore) -> Result<(), PipelineError> {
    let bronze = store.read(BRONZE_STOPS)?;

    let table = bronze.cast(&[("StopID", DType::Int32)])?;
    let table = table.drop_duplicates(&["StopID"])?;
    let table = table.rename("Name", "Stop_Name")?;
    let table = decode_list_column(&table, "Routes")?;

    let routes = explode(&table, &["StopID", "Routes"], &["Routes"])?;
    let table = table.drop_columns(&["Routes"])?;

    upsert(
        store,
        &table,
        SILVER_STOPS,
        &MergePredicate::key("StopID"),
        &[],
    )?;
    upsert(
        store,
        &routes,
        SILVER_STOP_ROUTES,
        &MergePredicate::keys(&["StopID", "Routes"]),
        &[],
    )?;
    info!(
        stops = table.n_rows(),
        routes = routes.n_rows(),
        "silver stops refined"
    );
    Ok(())
}

/// Silver positions: imputed, typed, and deduplicated by vehicle.
pub fn refine_positions(store: &dyn TableStore) -> Result<(), PipelineError> {
    let bronze = store.read(BRONZE_POSITIONS)?;

    let table = bronze.fill_missing(&[("BlockNumber", Scalar::Utf8("Null".to_owned()))])?;
    let table = table.cast(&[
        ("VehicleID", DType::Int16),
        ("TripID", DType::Int32),
        ("DirectionNum", DType::Int8),
        ("DateTime", DType::Timestamp),
        ("TripStartTime", DType::Timestamp),
        ("TripEndTime", DType::Timestamp),
        ("DirectionText", DType::Categorical),
    ])?;
    let table = table.drop_duplicates(&["VehicleID"])?;

    store.write_full(
        &table,
        SILVER_POSITIONS,
        WriteMode::default(),
        &POSITION_PARTITION_KEYS,
    )?;
    info!(rows = table.n_rows(), "silver positions refined");
    Ok(())
}

/// Silver stage over both resources. Each branch halts on its own
/// error; a missing bronze table is not recovered here.
pub fn run_silver(store: &dyn TableStore) -> Result<(), PipelineError> {
    refine_stops(store)?;
    refine_positions(store)?;
    Ok(())
}

/// One full fetch cycle: bronze then silver, strictly in sequence.
pub fn run_pipeline(config: &PipelineConfig) -> Result<(), PipelineError> {
    let client = ApiClient::new(&config.api.base_url, &config.api.api_key);
    let store = ParquetStore::new(&config.lake.root);
    let stamp = ExtractionStamp::now();

    run_bronze(&client, &store, &stamp)?;
    run_silver(&store)?;
    Ok(())
}
