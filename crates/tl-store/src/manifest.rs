use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tl_frame::Table;
use tl_types::DType;

use crate::StoreError;

pub(crate) const MANIFEST_FILE: &str = "_manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub dtype: DType,
}

/// Per-table commit record: the logical schema (the authority that
/// restores dtypes Parquet's physical model collapses), the partition
/// keys, and the data files in read order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u64,
    pub schema: Vec<FieldDef>,
    pub partition_keys: Vec<String>,
    pub files: Vec<String>,
}

impl Manifest {
    #[must_use]
    pub fn schema_of(table: &Table) -> Vec<FieldDef> {
        table
            .schema()
            .into_iter()
            .map(|(name, dtype)| FieldDef { name, dtype })
            .collect()
    }

    /// `Ok` when `table` carries exactly the manifest's columns and
    /// dtypes, in order; `Err` holds a human-readable mismatch detail.
    pub fn check_schema(&self, table: &Table) -> Result<(), String> {
        let actual = Self::schema_of(table);
        if actual == self.schema {
            return Ok(());
        }

        let expected_names: Vec<&str> =
            self.schema.iter().map(|field| field.name.as_str()).collect();
        let actual_names: Vec<&str> = actual.iter().map(|field| field.name.as_str()).collect();
        if expected_names != actual_names {
            return Err(format!(
                "expected columns {expected_names:?}, found {actual_names:?}"
            ));
        }
        for (expected, found) in self.schema.iter().zip(&actual) {
            if expected.dtype != found.dtype {
                return Err(format!(
                    "column {} has dtype {:?}, expected {:?}",
                    expected.name, found.dtype, expected.dtype
                ));
            }
        }
        Err("schemas differ".to_owned())
    }

    pub(crate) fn load(dir: &Path, location: &str) -> Result<Self, StoreError> {
        let path = dir.join(MANIFEST_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::TableNotFound {
                    location: location.to_owned(),
                });
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        serde_json::from_str(&raw).map_err(|err| StoreError::MalformedManifest {
            location: location.to_owned(),
            detail: err.to_string(),
        })
    }

    /// Commit via temp-file-then-rename so readers never observe a
    /// half-written manifest.
    pub(crate) fn store(&self, dir: &Path) -> Result<(), StoreError> {
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tl_columnar::Column;
    use tl_frame::Table;
    use tl_types::{DType, Scalar};

    use super::{FieldDef, Manifest};

    fn table() -> Table {
        Table::new(vec![(
            "StopID".to_owned(),
            Column::new(DType::Int32, vec![Scalar::Int32(1)]).expect("column"),
        )])
        .expect("table")
    }

    #[test]
    fn schema_check_reports_dtype_drift() {
        let manifest = Manifest {
            version: 0,
            schema: vec![FieldDef {
                name: "StopID".to_owned(),
                dtype: DType::Int16,
            }],
            partition_keys: Vec::new(),
            files: Vec::new(),
        };

        let detail = manifest.check_schema(&table()).expect_err("dtype differs");
        assert!(detail.contains("StopID"));
        assert!(detail.contains("Int16"));
    }

    #[test]
    fn manifest_serialization_round_trips() {
        let manifest = Manifest {
            version: 3,
            schema: Manifest::schema_of(&table()),
            partition_keys: vec!["fecha_consulta".to_owned()],
            files: vec!["part-00000.parquet".to_owned()],
        };
        let encoded = serde_json::to_string(&manifest).expect("encode");
        let decoded: Manifest = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, manifest);
    }
}
