//! Rows, column values and the name-indexed row decoder.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::{DataRow, FieldDescription};

/// Metadata for one result column, as reported by RowDescription.
pub type ColumnMetadata = FieldDescription;

/// An opaque column value or statement parameter in PostgreSQL text format.
///
/// `None` inside represents SQL NULL. Converting to and from concrete SQL
/// types is left to the caller; the helpers here cover the text forms.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Value(Option<Vec<u8>>);

impl Value {
    /// SQL NULL.
    pub const fn null() -> Self {
        Self(None)
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Some(bytes))
    }

    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Raw bytes, or `None` for SQL NULL.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }

    /// Take the raw bytes.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.0
    }

    /// View the value as UTF-8 text.
    pub fn as_str(&self) -> Result<&str> {
        let bytes = self
            .as_bytes()
            .ok_or_else(|| Error::Decode("unexpected NULL value".into()))?;
        simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
    }

    /// View the value as text, mapping NULL to `None`.
    pub fn as_opt_str(&self) -> Result<Option<&str>> {
        if self.is_null() {
            Ok(None)
        } else {
            self.as_str().map(Some)
        }
    }

    /// Parse the text form with [`FromStr`].
    pub fn parse<T>(&self) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let text = self.as_str()?;
        text.parse()
            .map_err(|e| Error::Decode(format!("cannot parse {:?}: {}", text, e)))
    }

    /// Interpret the PostgreSQL boolean text form.
    pub fn as_bool(&self) -> Result<bool> {
        match self.as_bytes() {
            Some(b"t" | b"true" | b"TRUE" | b"T" | b"1") => Ok(true),
            Some(b"f" | b"false" | b"FALSE" | b"F" | b"0") => Ok(false),
            Some(bytes) => Err(Error::Decode(format!(
                "invalid boolean: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
            None => Err(Error::Decode("unexpected NULL value".into())),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self(Some(value.as_bytes().to_vec()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self(Some(value.into_bytes()))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::from(if value { "t" } else { "f" })
    }
}

macro_rules! value_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self(Some(value.to_string().into_bytes()))
                }
            }
        )*
    };
}

value_from_display!(i16, i32, i64, u32, f32, f64);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::null(), Into::into)
    }
}

/// Maps column names to positions for one result shape.
#[derive(Debug, Clone, Default)]
pub struct RowDecoder {
    columns: Vec<ColumnMetadata>,
    index: HashMap<String, usize>,
}

impl RowDecoder {
    /// Build a decoder from RowDescription metadata.
    ///
    /// When names repeat, lookups resolve to the first column with that name.
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        let mut index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            index.entry(column.name.clone()).or_insert(position);
        }
        Self { columns, index }
    }

    /// Column metadata in result order.
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Position of the named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// One result row.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    decoder: Option<Arc<RowDecoder>>,
}

impl Row {
    pub(crate) fn new(data_row: DataRow, decoder: Option<Arc<RowDecoder>>) -> Self {
        Self {
            values: data_row.into_columns().into_iter().map(Value).collect(),
            decoder,
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column values in result order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Take the column values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Column metadata, if the portal was bound with metadata.
    pub fn columns(&self) -> Option<&[ColumnMetadata]> {
        self.decoder.as_deref().map(RowDecoder::columns)
    }

    /// Value at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the named column.
    ///
    /// Fails when the row carries no metadata or the name is unknown.
    pub fn get_by_name(&self, name: &str) -> Result<&Value> {
        let decoder = self.decoder.as_deref().ok_or_else(|| {
            Error::InvalidUsage("row has no column metadata; bind with metadata".into())
        })?;
        decoder
            .index_of(name)
            .and_then(|index| self.values.get(index))
            .ok_or_else(|| Error::InvalidUsage(format!("no column named {:?}", name)))
    }

    /// Parse the value at `index` from its text form.
    pub fn try_get<T>(&self, index: usize) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(index)
            .ok_or_else(|| Error::InvalidUsage(format!("column index {} out of range", index)))?
            .parse()
    }
}
