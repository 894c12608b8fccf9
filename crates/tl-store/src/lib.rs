#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tl_columnar::ColumnError;
use tl_frame::{FrameError, Table};
use tl_types::{DType, TypeError};

mod codec;
mod manifest;
mod parquet_store;
mod predicate;

pub use manifest::{FieldDef, Manifest};
pub use parquet_store::ParquetStore;
pub use predicate::MergePredicate;

/// Which side of a merge a key column was expected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySide {
    Source,
    Target,
}

impl std::fmt::Display for KeySide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no table exists at {location}")]
    TableNotFound { location: String },
    #[error("a table already exists at {location}")]
    TableExists { location: String },
    #[error("location {location} must be a relative path inside the lake")]
    InvalidLocation { location: String },
    #[error("schema mismatch at {location}: {detail}")]
    SchemaMismatch { location: String, detail: String },
    #[error("merge key column {name} is missing from the {side} table")]
    MissingKeyColumn { name: String, side: KeySide },
    #[error("partition key column {name} is missing from the table")]
    MissingPartitionColumn { name: String },
    #[error("malformed merge predicate {input:?}: {detail}")]
    MalformedPredicate { input: String, detail: String },
    #[error("manifest at {location} is malformed: {detail}")]
    MalformedManifest { location: String, detail: String },
    #[error("dtype {dtype:?} cannot be persisted")]
    UnsupportedDtype { dtype: DType },
    #[error("table data is corrupt: {detail}")]
    CorruptData { detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
    FailIfExists,
    NoOpIfExists,
}

/// Storage capability the pipeline writes through. Implementable over any
/// engine offering atomic write-or-fail and a distinguishable not-found
/// signal.
pub trait TableStore {
    fn exists(&self, location: &str) -> bool;

    fn read(&self, location: &str) -> Result<Table, StoreError>;

    /// Create or rewrite the table per `mode`. Partition key columns
    /// should hold low-cardinality, stable values; every distinct value
    /// combination becomes its own directory of part files.
    fn write_full(
        &self,
        table: &Table,
        location: &str,
        mode: WriteMode,
        partition_keys: &[&str],
    ) -> Result<(), StoreError>;

    /// Insert-only merge: append the source rows whose key tuple (per
    /// `predicate`) has no match in the existing table. Existing rows are
    /// never modified or deleted. Returns the number of rows inserted.
    fn merge_insert_only(
        &self,
        table: &Table,
        location: &str,
        predicate: &MergePredicate,
    ) -> Result<usize, StoreError>;
}

/// How an [`upsert`] call landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The table existed; only unmatched rows were appended.
    Merged { inserted: usize },
    /// The table was absent; the batch became the initial full write.
    InitialLoad { rows: usize },
}

/// Insert-new-rows-only write strategy. A missing table (and only that
/// condition) falls back to an initial full write, applying
/// `partition_keys`; every other error propagates.
pub fn upsert<S: TableStore + ?Sized>(
    store: &S,
    table: &Table,
    location: &str,
    predicate: &MergePredicate,
    partition_keys: &[&str],
) -> Result<UpsertOutcome, StoreError> {
    match store.merge_insert_only(table, location, predicate) {
        Ok(inserted) => Ok(UpsertOutcome::Merged { inserted }),
        Err(StoreError::TableNotFound { .. }) => {
            tracing::info!(location, "table not found, performing initial full write");
            store.write_full(table, location, WriteMode::Overwrite, partition_keys)?;
            Ok(UpsertOutcome::InitialLoad {
                rows: table.n_rows(),
            })
        }
        Err(err) => Err(err),
    }
}
