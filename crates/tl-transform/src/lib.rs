#![forbid(unsafe_code)]

use std::collections::HashMap;

use chrono::{Local, NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use thiserror::Error;
use tl_columnar::{Column, ColumnError};
use tl_frame::{FrameError, Table};
use tl_types::{DType, NullKind, Scalar, TypeError};
use tracing::warn;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("column not found: {name}")]
    MissingColumn { name: String },
    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("malformed list literal {value:?}: {detail}")]
    MalformedListLiteral { value: String, detail: String },
    #[error(transparent)]
    Frame(FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl From<FrameError> for TransformError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::MissingColumn { name } => Self::MissingColumn { name },
            other => Self::Frame(other),
        }
    }
}

/// Date and time-of-day a batch was pulled from the upstream API.
/// Explicit so incremental normalization stays deterministic under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionStamp {
    date: NaiveDate,
    time: NaiveTime,
}

impl ExtractionStamp {
    #[must_use]
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    #[must_use]
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self {
            date: now.date(),
            time: now.time(),
        }
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// `HH:MM:SS`, the partition-directory-safe form the positions
    /// table stores.
    #[must_use]
    pub fn time_hms(&self) -> String {
        self.time.format("%H:%M:%S").to_string()
    }
}

pub const EXTRACTION_DATE_COLUMN: &str = "fecha_consulta";
pub const EXTRACTION_TIME_COLUMN: &str = "hora_consulta";

/// Flatten a batch of JSON records into a table. Nested objects flatten
/// with dot-joined names, arrays become list cells, and the column set is
/// the union of keys across records in first-seen order.
pub fn normalize(records: &[Value]) -> Result<Table, TransformError> {
    let mut names: Vec<String> = Vec::new();
    let mut rows: Vec<HashMap<String, Scalar>> = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let Value::Object(fields) = record else {
            return Err(TransformError::NotAnObject { index });
        };
        let mut flat = Vec::new();
        flatten_object(None, fields, &mut flat);

        let mut row = HashMap::with_capacity(flat.len());
        for (name, scalar) in flat {
            if !names.contains(&name) {
                names.push(name.clone());
            }
            row.insert(name, scalar);
        }
        rows.push(row);
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let values = rows
            .iter()
            .map(|row| row.get(&name).cloned().unwrap_or(Scalar::Null(NullKind::Null)))
            .collect::<Vec<_>>();
        columns.push((name, Column::from_values(values)?));
    }
    Ok(Table::new(columns)?)
}

/// `normalize` plus the two trailing extraction-stamp columns used to
/// partition point-in-time feeds.
pub fn normalize_incremental(
    records: &[Value],
    stamp: &ExtractionStamp,
) -> Result<Table, TransformError> {
    let table = normalize(records)?;
    let rows = table.n_rows();

    let date_column = Column::new(DType::Date, vec![Scalar::Date(stamp.date()); rows])?;
    let time_column = Column::new(DType::Utf8, vec![Scalar::Utf8(stamp.time_hms()); rows])?;

    let table = table.with_column(EXTRACTION_DATE_COLUMN, date_column)?;
    Ok(table.with_column(EXTRACTION_TIME_COLUMN, time_column)?)
}

fn flatten_object(prefix: Option<&str>, fields: &Map<String, Value>, out: &mut Vec<(String, Scalar)>) {
    for (key, value) in fields {
        let name = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_object(Some(&name), inner, out),
            other => out.push((name, json_to_scalar(other))),
        }
    }
}

fn json_to_scalar(value: &Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null(NullKind::Null),
        Value::Bool(v) => Scalar::Bool(*v),
        Value::Number(v) => match v.as_i64() {
            Some(n) => Scalar::Int64(n),
            None => Scalar::Float64(v.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(v) => Scalar::Utf8(v.clone()),
        Value::Array(items) => Scalar::List(items.iter().map(json_to_scalar).collect()),
        // Objects inside arrays stay opaque; the pipeline never consumes
        // them column-wise.
        Value::Object(_) => Scalar::Utf8(value.to_string()),
    }
}

/// Decode a string-encoded list literal (`"['10A', '33']"`) into its
/// elements. The upstream source embeds these in string columns; the
/// decode is explicit and fails loudly on malformed input.
pub fn parse_list_literal(raw: &str) -> Result<Vec<Scalar>, TransformError> {
    let malformed = |detail: &str| TransformError::MalformedListLiteral {
        value: raw.to_owned(),
        detail: detail.to_owned(),
    };

    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| malformed("expected surrounding brackets"))?;

    let mut elements = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        if first == '\'' || first == '"' {
            let quote = first;
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => text.push(escaped),
                        None => return Err(malformed("dangling escape")),
                    },
                    c if c == quote => {
                        closed = true;
                        break;
                    }
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(malformed("unterminated quoted element"));
            }
            elements.push(Scalar::Utf8(text));
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                token.push(c);
                chars.next();
            }
            let token = token.trim();
            if token.is_empty() {
                return Err(malformed("empty element"));
            }
            if let Ok(n) = token.parse::<i64>() {
                elements.push(Scalar::Int64(n));
            } else if let Ok(f) = token.parse::<f64>() {
                elements.push(Scalar::Float64(f));
            } else {
                return Err(malformed("unquoted element is not a number"));
            }
        }

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some(',') => {}
            Some(_) => return Err(malformed("expected comma between elements")),
            None => break,
        }
    }
    Ok(elements)
}

/// Rebuild `column` so every string-encoded list literal becomes a real
/// list cell. Cells that are already lists, and missing cells, pass
/// through unchanged.
pub fn decode_list_column(table: &Table, column: &str) -> Result<Table, TransformError> {
    let source = table.column_required(column).map_err(TransformError::from)?;

    let mut values = Vec::with_capacity(source.len());
    for value in source.values() {
        match value {
            Scalar::List(_) | Scalar::Null(_) => values.push(value.clone()),
            Scalar::Utf8(raw) | Scalar::Categorical(raw) => {
                values.push(Scalar::List(parse_list_literal(raw)?));
            }
            other => {
                return Err(TransformError::MalformedListLiteral {
                    value: format!("{other:?}"),
                    detail: "cell is neither a string nor a list".to_owned(),
                });
            }
        }
    }

    Ok(table.with_column(column, Column::from_values(values)?)?)
}

/// Expand list-valued cells into one row per element.
///
/// The result is restricted to `selected` (a missing name fails with
/// `MissingColumn` and no partial output). Each column in `explode_columns`
/// must hold lists in every cell; a column with any non-list cell is left
/// as-is with a logged warning. Output rows follow source row order, then
/// list element order. Empty lists yield no rows for that source row.
pub fn explode(
    source: &Table,
    selected: &[&str],
    explode_columns: &[&str],
) -> Result<Table, TransformError> {
    let mut result = source.select(selected).map_err(TransformError::from)?;

    for name in explode_columns {
        let column = result
            .column(name)
            .ok_or_else(|| TransformError::MissingColumn {
                name: (*name).to_owned(),
            })?;

        if !column.values().iter().all(|v| matches!(v, Scalar::List(_))) {
            warn!(column = *name, "column holds non-list cells; skipping explode");
            continue;
        }

        let elem_dtype = match column.dtype() {
            DType::List(elem) => (**elem).clone(),
            _ => DType::Null,
        };

        let mut positions = Vec::new();
        let mut elements = Vec::new();
        for (row, value) in column.values().iter().enumerate() {
            let Scalar::List(items) = value else {
                continue;
            };
            for item in items {
                positions.push(row);
                elements.push(item.clone());
            }
        }

        let exploded = Column::new(elem_dtype, elements)?;
        result = result
            .take(&positions)
            .map_err(TransformError::from)?
            .with_column(name, exploded)
            .map_err(TransformError::from)?;
    }

    Ok(result)
}
