use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tl_frame::Table;
use tl_types::{KeyValue, Scalar};
use tracing::{debug, info};

use crate::codec::{read_parquet_file, write_parquet_file};
use crate::manifest::Manifest;
use crate::predicate::MergePredicate;
use crate::{KeySide, StoreError, TableStore, WriteMode};

/// Table store over a local directory tree: one directory per table
/// location, Parquet part files grouped into hive-style partition
/// directories, and a JSON manifest as the commit record.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, location: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(location);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if location.is_empty() || !plain {
            return Err(StoreError::InvalidLocation {
                location: location.to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn load_manifest(&self, location: &str) -> Result<(PathBuf, Manifest), StoreError> {
        let dir = self.table_dir(location)?;
        let manifest = Manifest::load(&dir, location)?;
        Ok((dir, manifest))
    }

    /// Write one part file per partition group and return the new
    /// manifest-relative file names, numbering after `next_index`.
    fn write_parts(
        dir: &Path,
        table: &Table,
        partition_keys: &[String],
        next_index: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut files = Vec::new();
        for (offset, (segments, part)) in
            split_partitions(table, partition_keys)?.into_iter().enumerate()
        {
            let file_name = format!("part-{:05}.parquet", next_index + offset);
            let mut part_dir = dir.to_path_buf();
            for segment in &segments {
                part_dir = part_dir.join(segment);
            }
            fs::create_dir_all(&part_dir)?;
            write_parquet_file(&part, &part_dir.join(&file_name))?;

            let mut relative = segments.join("/");
            if !relative.is_empty() {
                relative.push('/');
            }
            relative.push_str(&file_name);
            files.push(relative);
        }
        Ok(files)
    }

    fn create(
        &self,
        table: &Table,
        location: &str,
        partition_keys: &[&str],
        prior_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let dir = self.table_dir(location)?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let partition_keys: Vec<String> =
            partition_keys.iter().map(|key| (*key).to_owned()).collect();
        let files = if table.n_cols() == 0 {
            Vec::new()
        } else {
            Self::write_parts(&dir, table, &partition_keys, 0)?
        };

        let manifest = Manifest {
            version: prior_version.map_or(0, |version| version + 1),
            schema: Manifest::schema_of(table),
            partition_keys,
            files,
        };
        manifest.store(&dir)?;
        info!(location, rows = table.n_rows(), "wrote table");
        Ok(())
    }

    fn append(
        &self,
        table: &Table,
        location: &str,
        partition_keys: &[&str],
    ) -> Result<(), StoreError> {
        let (dir, mut manifest) = match self.load_manifest(location) {
            Ok(loaded) => loaded,
            Err(StoreError::TableNotFound { .. }) => {
                return self.create(table, location, partition_keys, None);
            }
            Err(err) => return Err(err),
        };

        if let Err(detail) = manifest.check_schema(table) {
            return Err(StoreError::SchemaMismatch {
                location: location.to_owned(),
                detail,
            });
        }

        let new_files =
            Self::write_parts(&dir, table, &manifest.partition_keys, manifest.files.len())?;
        manifest.files.extend(new_files);
        manifest.version += 1;
        manifest.store(&dir)?;
        info!(location, rows = table.n_rows(), "appended to table");
        Ok(())
    }
}

impl TableStore for ParquetStore {
    fn exists(&self, location: &str) -> bool {
        self.table_dir(location)
            .map(|dir| dir.join(crate::manifest::MANIFEST_FILE).is_file())
            .unwrap_or(false)
    }

    fn read(&self, location: &str) -> Result<Table, StoreError> {
        let (dir, manifest) = self.load_manifest(location)?;

        let mut parts = Vec::with_capacity(manifest.files.len());
        for file in &manifest.files {
            parts.push(read_parquet_file(&dir.join(file))?);
        }

        let table = if parts.is_empty() {
            empty_table_for(&manifest)?
        } else {
            Table::concat(&parts)?
        };

        // Restore the logical schema; Parquet's physical model collapses
        // Categorical into plain strings.
        let mapping: Vec<(&str, tl_types::DType)> = manifest
            .schema
            .iter()
            .map(|field| (field.name.as_str(), field.dtype.clone()))
            .collect();
        Ok(table.cast(&mapping)?)
    }

    fn write_full(
        &self,
        table: &Table,
        location: &str,
        mode: WriteMode,
        partition_keys: &[&str],
    ) -> Result<(), StoreError> {
        let exists = self.exists(location);
        match mode {
            WriteMode::FailIfExists if exists => Err(StoreError::TableExists {
                location: location.to_owned(),
            }),
            WriteMode::NoOpIfExists if exists => {
                debug!(location, "table already exists, skipping write");
                Ok(())
            }
            WriteMode::Append => self.append(table, location, partition_keys),
            _ => {
                let prior_version = if exists {
                    Some(self.load_manifest(location)?.1.version)
                } else {
                    None
                };
                self.create(table, location, partition_keys, prior_version)
            }
        }
    }

    fn merge_insert_only(
        &self,
        table: &Table,
        location: &str,
        predicate: &MergePredicate,
    ) -> Result<usize, StoreError> {
        if table.n_cols() == 0 {
            debug!(location, "merge source carries no columns, nothing to insert");
            return Ok(0);
        }

        let (dir, mut manifest) = self.load_manifest(location)?;

        for key in predicate.key_names() {
            if table.column(key).is_none() {
                return Err(StoreError::MissingKeyColumn {
                    name: key.clone(),
                    side: KeySide::Source,
                });
            }
            if !manifest.schema.iter().any(|field| &field.name == key) {
                return Err(StoreError::MissingKeyColumn {
                    name: key.clone(),
                    side: KeySide::Target,
                });
            }
        }

        if let Err(detail) = manifest.check_schema(table) {
            return Err(StoreError::SchemaMismatch {
                location: location.to_owned(),
                detail,
            });
        }

        let keys: Vec<&str> = predicate.key_names().iter().map(String::as_str).collect();
        let existing = self.read(location)?.key_tuples(&keys)?;
        let fresh = table.rows_not_in(&keys, &existing)?;
        if fresh.is_empty() {
            debug!(location, "merge found no new rows");
            return Ok(0);
        }

        let inserts = table.take(&fresh)?;
        let new_files = Self::write_parts(
            &dir,
            &inserts,
            &manifest.partition_keys,
            manifest.files.len(),
        )?;
        manifest.files.extend(new_files);
        manifest.version += 1;
        manifest.store(&dir)?;
        info!(
            location,
            inserted = inserts.n_rows(),
            predicate = %predicate,
            "merged new rows"
        );
        Ok(inserts.n_rows())
    }
}

fn empty_table_for(manifest: &Manifest) -> Result<Table, StoreError> {
    let columns = manifest
        .schema
        .iter()
        .map(|field| {
            tl_columnar::Column::new(field.dtype.clone(), Vec::new())
                .map(|column| (field.name.clone(), column))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Table::new(columns)?)
}

/// Partition value as it appears in a `key=value` directory name.
fn partition_value(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Null(_) => "null".to_owned(),
        Scalar::Bool(v) => v.to_string(),
        Scalar::Int8(v) => v.to_string(),
        Scalar::Int16(v) => v.to_string(),
        Scalar::Int32(v) => v.to_string(),
        Scalar::Int64(v) => v.to_string(),
        Scalar::Float64(v) => v.to_string(),
        Scalar::Utf8(v) | Scalar::Categorical(v) => v.replace(['/', '=', '\\'], "_"),
        Scalar::Date(v) => v.format("%Y-%m-%d").to_string(),
        Scalar::Timestamp(v) => v.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Scalar::List(_) => "list".to_owned(),
    }
}

/// Group rows by their partition-key tuple, first-seen order, keeping
/// source row order within each group. No keys means one whole-table
/// group at the table directory itself.
fn split_partitions(
    table: &Table,
    partition_keys: &[String],
) -> Result<Vec<(Vec<String>, Table)>, StoreError> {
    if partition_keys.is_empty() {
        return Ok(vec![(Vec::new(), table.clone())]);
    }

    let key_columns = partition_keys
        .iter()
        .map(|key| {
            table.column(key).ok_or_else(|| StoreError::MissingPartitionColumn {
                name: key.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_tuple: HashMap<Vec<KeyValue>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<String>, Vec<usize>)> = Vec::new();
    for row in 0..table.n_rows() {
        let tuple = key_columns
            .iter()
            .map(|column| column.values()[row].to_key())
            .collect::<Result<Vec<_>, _>>()?;
        let group = match by_tuple.get(&tuple) {
            Some(group) => *group,
            None => {
                let segments = partition_keys
                    .iter()
                    .zip(&key_columns)
                    .map(|(key, column)| format!("{key}={}", partition_value(&column.values()[row])))
                    .collect();
                by_tuple.insert(tuple, groups.len());
                groups.push((segments, Vec::new()));
                groups.len() - 1
            }
        };
        groups[group].1.push(row);
    }

    groups
        .into_iter()
        .map(|(segments, rows)| Ok((segments, table.take(&rows)?)))
        .collect()
}
