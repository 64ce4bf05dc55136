//! Tabular results: rows, tables, a forward-only reader and row mapping.

use crate::error::{OrmError, OrmResult};
use crate::value::{FromValue, Value};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Resolve a column name: exact match first, then ASCII case-insensitive.
fn find_ordinal(columns: &[String], name: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c == name)
        .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
}

/// A single result row. Column names are shared by all rows of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl DataRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> OrmResult<Self> {
        if columns.len() != values.len() {
            return Err(OrmError::invalid_argument(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Column ordinal for `name`, if present.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        find_ordinal(&self.columns, name)
    }

    /// Raw value at `ordinal`.
    pub fn value(&self, ordinal: usize) -> OrmResult<&Value> {
        self.values.get(ordinal).ok_or_else(|| {
            OrmError::invalid_argument(format!(
                "ordinal {ordinal} is out of range ({} columns)",
                self.values.len()
            ))
        })
    }

    /// Raw value of column `name`.
    pub fn value_by_name(&self, name: &str) -> OrmResult<&Value> {
        let ordinal = self
            .ordinal(name)
            .ok_or_else(|| OrmError::decode(name, "column not found"))?;
        self.value(ordinal)
    }

    pub fn is_null(&self, ordinal: usize) -> OrmResult<bool> {
        Ok(self.value(ordinal)?.is_null())
    }

    /// Typed value at `ordinal`.
    pub fn get<T: FromValue>(&self, ordinal: usize) -> OrmResult<T> {
        let value = self.value(ordinal)?;
        T::from_value(value).map_err(|e| OrmError::decode(&self.columns[ordinal], e.to_string()))
    }

    /// Typed value of column `name`.
    pub fn try_get<T: FromValue>(&self, name: &str) -> OrmResult<T> {
        let ordinal = self
            .ordinal(name)
            .ok_or_else(|| OrmError::decode(name, "column not found"))?;
        self.get(ordinal)
    }

    /// Typed value of column `name`, or `T::default()` when the column is absent.
    pub fn try_get_or_default<T: FromValue + Default>(&self, name: &str) -> OrmResult<T> {
        match self.ordinal(name) {
            Some(ordinal) => self.get(ordinal),
            None => Ok(T::default()),
        }
    }
}

/// A fully buffered result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataTable {
    columns: Arc<[String]>,
    rows: Vec<DataRow>,
}

impl DataTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; the value count must match the column count.
    pub fn push_row(&mut self, values: Vec<Value>) -> OrmResult<()> {
        let row = DataRow::new(Arc::clone(&self.columns), values)?;
        self.rows.push(row);
        Ok(())
    }

    /// Builder-style [`DataTable::push_row`].
    pub fn with_row(mut self, values: Vec<Value>) -> OrmResult<Self> {
        self.push_row(values)?;
        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&DataRow> {
        self.rows.first()
    }

    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }

    /// Map every row onto `T`.
    pub fn map_rows<T: FromRow>(&self) -> OrmResult<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }

    /// Forward-only reader over the rows.
    pub fn into_reader(self) -> DataReader {
        DataReader::new(self)
    }
}

/// Forward-only reader over a buffered result.
///
/// Call [`DataReader::read`] to advance to the next row before reading fields.
#[derive(Debug)]
pub struct DataReader {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<DataRow>,
    current: Option<DataRow>,
}

impl DataReader {
    pub fn new(table: DataTable) -> Self {
        Self {
            columns: table.columns,
            rows: table.rows.into_iter(),
            current: None,
        }
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    pub fn read(&mut self) -> bool {
        self.current = self.rows.next();
        self.current.is_some()
    }

    /// Whether a row is loaded or more rows remain to be read.
    pub fn has_rows(&self) -> bool {
        self.current.is_some() || self.rows.len() > 0
    }

    /// Multiple result sets are not produced by this reader.
    pub fn next_result(&mut self) -> OrmResult<bool> {
        Err(OrmError::not_supported(
            "DataReader holds a single result set",
        ))
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    /// Column name at `ordinal`.
    pub fn name(&self, ordinal: usize) -> OrmResult<&str> {
        self.columns
            .get(ordinal)
            .map(String::as_str)
            .ok_or_else(|| OrmError::invalid_argument(format!("ordinal {ordinal} is out of range")))
    }

    /// Column ordinal for `name`.
    pub fn ordinal(&self, name: &str) -> OrmResult<usize> {
        find_ordinal(&self.columns, name)
            .ok_or_else(|| OrmError::invalid_argument(format!("column '{name}' not found")))
    }

    /// The row the reader is positioned on.
    pub fn current(&self) -> OrmResult<&DataRow> {
        self.current
            .as_ref()
            .ok_or_else(|| OrmError::invalid_operation("no current row; call read() first"))
    }

    pub fn value(&self, ordinal: usize) -> OrmResult<&Value> {
        self.current()?.value(ordinal)
    }

    pub fn is_null(&self, ordinal: usize) -> OrmResult<bool> {
        self.current()?.is_null(ordinal)
    }

    pub fn get<T: FromValue>(&self, ordinal: usize) -> OrmResult<T> {
        self.current()?.get(ordinal)
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> OrmResult<T> {
        self.current()?.try_get(name)
    }

    pub fn get_bool(&self, ordinal: usize) -> OrmResult<bool> {
        self.get(ordinal)
    }

    pub fn get_i16(&self, ordinal: usize) -> OrmResult<i16> {
        self.get(ordinal)
    }

    pub fn get_i32(&self, ordinal: usize) -> OrmResult<i32> {
        self.get(ordinal)
    }

    pub fn get_i64(&self, ordinal: usize) -> OrmResult<i64> {
        self.get(ordinal)
    }

    pub fn get_f32(&self, ordinal: usize) -> OrmResult<f32> {
        self.get(ordinal)
    }

    pub fn get_f64(&self, ordinal: usize) -> OrmResult<f64> {
        self.get(ordinal)
    }

    pub fn get_string(&self, ordinal: usize) -> OrmResult<String> {
        self.get(ordinal)
    }

    pub fn get_uuid(&self, ordinal: usize) -> OrmResult<Uuid> {
        self.get(ordinal)
    }

    pub fn get_timestamp(&self, ordinal: usize) -> OrmResult<NaiveDateTime> {
        self.get(ordinal)
    }

    pub fn get_timestamptz(&self, ordinal: usize) -> OrmResult<DateTime<Utc>> {
        self.get(ordinal)
    }

    /// Copy bytes of a `bytea` column, starting at `field_offset`, into
    /// `buffer`. Returns the number of bytes copied.
    pub fn get_bytes(
        &self,
        ordinal: usize,
        field_offset: usize,
        buffer: Option<&mut [u8]>,
    ) -> OrmResult<usize> {
        let buffer =
            buffer.ok_or_else(|| OrmError::invalid_argument("destination buffer is required"))?;
        let name = self.name(ordinal)?;
        let bytes = match self.value(ordinal)? {
            Value::Bytes(b) => b,
            other => {
                return Err(OrmError::decode(
                    name,
                    format!("cannot read bytes from {} value", other.type_name()),
                ));
            }
        };
        if field_offset >= bytes.len() {
            return Ok(0);
        }
        let available = &bytes[field_offset..];
        let n = available.len().min(buffer.len());
        buffer[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    /// Length of a `bytea` column's value.
    pub fn bytes_len(&self, ordinal: usize) -> OrmResult<usize> {
        match self.value(ordinal)? {
            Value::Bytes(b) => Ok(b.len()),
            other => Err(OrmError::decode(
                self.name(ordinal)?,
                format!("cannot read bytes from {} value", other.type_name()),
            )),
        }
    }
}

impl Iterator for DataReader {
    type Item = DataRow;

    fn next(&mut self) -> Option<Self::Item> {
        self.current = None;
        self.rows.next()
    }
}

/// Trait for converting a result row into a Rust value.
///
/// This trait should typically be derived using `#[derive(FromRow)]`.
///
/// # Example
///
/// ```ignore
/// use pgmat::FromRow;
///
/// #[derive(FromRow)]
/// struct User {
///     id: i64,
///     username: String,
///     #[orm(column = "email_address")]
///     email: Option<String>,
/// }
/// ```
pub trait FromRow: Sized {
    /// Convert a row into Self
    fn from_row(row: &DataRow) -> OrmResult<Self>;
}

impl FromRow for DataRow {
    fn from_row(row: &DataRow) -> OrmResult<Self> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_row_tuple {
    ($($idx:tt => $ty:ident),+) => {
        impl<$($ty: FromValue),+> FromRow for ($($ty,)+) {
            fn from_row(row: &DataRow) -> OrmResult<Self> {
                Ok(($(row.get::<$ty>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(0 => A);
impl_from_row_tuple!(0 => A, 1 => B);
impl_from_row_tuple!(0 => A, 1 => B, 2 => C);
impl_from_row_tuple!(0 => A, 1 => B, 2 => C, 3 => D);
impl_from_row_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
impl_from_row_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F);
