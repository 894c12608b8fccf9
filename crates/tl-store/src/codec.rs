use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    Int64Array, ListArray, ListBuilder, StringArray, StringBuilder, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tl_columnar::Column;
use tl_frame::Table;
use tl_types::{
    DType, Scalar, date_to_epoch_days, epoch_days_to_date, micros_to_timestamp,
    timestamp_to_micros,
};

use crate::StoreError;

pub(crate) fn write_parquet_file(table: &Table, path: &Path) -> Result<(), StoreError> {
    let batch = table_to_batch(table)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

pub(crate) fn read_parquet_file(path: &Path) -> Result<Table, StoreError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut parts = Vec::new();
    for batch in reader {
        parts.push(batch_to_table(&batch?)?);
    }
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    Ok(Table::concat(&parts)?)
}

macro_rules! int_values {
    ($column:expr, $variant:ident, $ty:ty) => {
        $column
            .values()
            .iter()
            .map(|v| match v {
                Scalar::$variant(n) => Some(*n),
                _ => None,
            })
            .collect::<Vec<Option<$ty>>>()
    };
}

macro_rules! read_ints {
    ($array:expr, $array_ty:ty, $variant:ident, $values:expr, $len:expr) => {{
        let typed = downcast::<$array_ty>($array, "integer")?;
        for idx in 0..$len {
            $values.push(if typed.is_null(idx) {
                Scalar::missing_for_dtype(&DType::$variant)
            } else {
                Scalar::$variant(typed.value(idx))
            });
        }
        DType::$variant
    }};
}

fn string_values(column: &Column) -> Vec<Option<String>> {
    column
        .values()
        .iter()
        .map(|value| match value {
            Scalar::Utf8(v) | Scalar::Categorical(v) => Some(v.clone()),
            _ => None,
        })
        .collect()
}

/// Arrow representation of a logical column. `Null` and `Categorical`
/// columns travel as nullable Utf8; the manifest restores them on read.
fn column_to_array(column: &Column) -> Result<ArrayRef, StoreError> {
    let array: ArrayRef = match column.dtype() {
        DType::Null | DType::Utf8 | DType::Categorical => {
            Arc::new(StringArray::from(string_values(column)))
        }
        DType::Bool => Arc::new(BooleanArray::from(
            column
                .values()
                .iter()
                .map(|v| match v {
                    Scalar::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DType::Int8 => Arc::new(Int8Array::from(int_values!(column, Int8, i8))),
        DType::Int16 => Arc::new(Int16Array::from(int_values!(column, Int16, i16))),
        DType::Int32 => Arc::new(Int32Array::from(int_values!(column, Int32, i32))),
        DType::Int64 => Arc::new(Int64Array::from(int_values!(column, Int64, i64))),
        DType::Float64 => Arc::new(Float64Array::from(
            column
                .values()
                .iter()
                .map(|v| match v {
                    Scalar::Float64(f) if !f.is_nan() => Some(*f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DType::Date => Arc::new(Date32Array::from(
            column
                .values()
                .iter()
                .map(|v| match v {
                    Scalar::Date(d) => Some(date_to_epoch_days(*d)),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DType::Timestamp => Arc::new(TimestampMicrosecondArray::from(
            column
                .values()
                .iter()
                .map(|v| match v {
                    Scalar::Timestamp(ts) => Some(timestamp_to_micros(*ts)),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        DType::List(elem) => {
            if !matches!(elem.as_ref(), DType::Null | DType::Utf8 | DType::Categorical) {
                return Err(StoreError::UnsupportedDtype {
                    dtype: column.dtype().clone(),
                });
            }
            let mut builder = ListBuilder::new(StringBuilder::new());
            for value in column.values() {
                match value {
                    Scalar::List(items) => {
                        for item in items {
                            match item {
                                Scalar::Utf8(v) | Scalar::Categorical(v) => {
                                    builder.values().append_value(v);
                                }
                                _ => builder.values().append_null(),
                            }
                        }
                        builder.append(true);
                    }
                    _ => builder.append(false),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

pub(crate) fn table_to_batch(table: &Table) -> Result<RecordBatch, StoreError> {
    let mut fields = Vec::with_capacity(table.n_cols());
    let mut arrays = Vec::with_capacity(table.n_cols());
    for (name, column) in table.columns() {
        let array = column_to_array(column)?;
        fields.push(Field::new(name, array.data_type().clone(), true));
        arrays.push(array);
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, what: &str) -> Result<&'a T, StoreError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::CorruptData {
            detail: format!("column data does not match its declared {what} type"),
        })
}

fn array_to_column(array: &ArrayRef) -> Result<Column, StoreError> {
    let len = array.len();
    let mut values = Vec::with_capacity(len);
    let dtype = match array.data_type() {
        DataType::Utf8 => {
            let typed = downcast::<StringArray>(array, "utf8")?;
            for idx in 0..len {
                values.push(if typed.is_null(idx) {
                    Scalar::missing_for_dtype(&DType::Utf8)
                } else {
                    Scalar::Utf8(typed.value(idx).to_owned())
                });
            }
            DType::Utf8
        }
        DataType::Boolean => {
            let typed = downcast::<BooleanArray>(array, "boolean")?;
            for idx in 0..len {
                values.push(if typed.is_null(idx) {
                    Scalar::missing_for_dtype(&DType::Bool)
                } else {
                    Scalar::Bool(typed.value(idx))
                });
            }
            DType::Bool
        }
        DataType::Int8 => read_ints!(array, Int8Array, Int8, values, len),
        DataType::Int16 => read_ints!(array, Int16Array, Int16, values, len),
        DataType::Int32 => read_ints!(array, Int32Array, Int32, values, len),
        DataType::Int64 => read_ints!(array, Int64Array, Int64, values, len),
        DataType::Float64 => {
            let typed = downcast::<Float64Array>(array, "float64")?;
            for idx in 0..len {
                values.push(if typed.is_null(idx) {
                    Scalar::missing_for_dtype(&DType::Float64)
                } else {
                    Scalar::Float64(typed.value(idx))
                });
            }
            DType::Float64
        }
        DataType::Date32 => {
            let typed = downcast::<Date32Array>(array, "date32")?;
            for idx in 0..len {
                values.push(if typed.is_null(idx) {
                    Scalar::missing_for_dtype(&DType::Date)
                } else {
                    Scalar::Date(epoch_days_to_date(typed.value(idx)))
                });
            }
            DType::Date
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let typed = downcast::<TimestampMicrosecondArray>(array, "timestamp")?;
            for idx in 0..len {
                if typed.is_null(idx) {
                    values.push(Scalar::missing_for_dtype(&DType::Timestamp));
                    continue;
                }
                let ts = micros_to_timestamp(typed.value(idx)).ok_or_else(|| {
                    StoreError::CorruptData {
                        detail: format!("timestamp {} is out of range", typed.value(idx)),
                    }
                })?;
                values.push(Scalar::Timestamp(ts));
            }
            DType::Timestamp
        }
        DataType::List(_) => {
            let typed = downcast::<ListArray>(array, "list")?;
            for idx in 0..len {
                if typed.is_null(idx) {
                    values.push(Scalar::Null(tl_types::NullKind::Null));
                    continue;
                }
                let cell = typed.value(idx);
                let items = downcast::<StringArray>(&cell, "list<utf8>")?;
                let mut elems = Vec::with_capacity(items.len());
                for item_idx in 0..items.len() {
                    elems.push(if items.is_null(item_idx) {
                        Scalar::Null(tl_types::NullKind::Null)
                    } else {
                        Scalar::Utf8(items.value(item_idx).to_owned())
                    });
                }
                values.push(Scalar::List(elems));
            }
            DType::List(Box::new(DType::Utf8))
        }
        other => {
            return Err(StoreError::CorruptData {
                detail: format!("unsupported arrow type {other:?} in data file"),
            });
        }
    };
    Ok(Column::new(dtype, values)?)
}

pub(crate) fn batch_to_table(batch: &RecordBatch) -> Result<Table, StoreError> {
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, array) in batch.schema().fields().iter().zip(batch.columns()) {
        columns.push((field.name().clone(), array_to_column(array)?));
    }
    Ok(Table::new(columns)?)
}
