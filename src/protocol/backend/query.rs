//! Query-related backend messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::command_status::CommandStatus;
use crate::error::{Error, Result};
use crate::protocol::codec::ResponseBody;
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// OID of the owning table (0 if not a table column)
    pub table_oid: Oid,
    /// Attribute number within the owning table (0 if not a table column)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    /// Type modifier (type-specific)
    pub type_modifier: i32,
    /// Format code
    pub format: FormatCode,
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescription {
    fields: Vec<FieldDescription>,
}

impl RowDescription {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let mut body = ResponseBody::new("RowDescription", payload);
        let num_fields = body.read_u16()? as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = body.read_cstr()?.to_string();
            let tail = FieldDescriptionTail::ref_from_bytes(body.read_bytes(TAIL_SIZE)?)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;

            fields.push(FieldDescription {
                name,
                table_oid: tail.table_oid.get(),
                column_id: tail.column_id.get(),
                type_oid: tail.type_oid.get(),
                type_size: tail.type_size.get(),
                type_modifier: tail.type_modifier.get(),
                format: FormatCode::from_u16(tail.format.get()),
            });
        }

        body.finish()?;
        Ok(Self { fields })
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get field descriptions.
    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// Take ownership of the field descriptions.
    pub fn into_fields(self) -> Vec<FieldDescription> {
        self.fields
    }
}

/// DataRow message - contains a single row of data.
///
/// Each column is `None` for SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    columns: Vec<Option<Vec<u8>>>,
}

impl DataRow {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("DataRow", payload);
        let num_columns = body.read_u16()? as usize;
        let mut columns = Vec::with_capacity(num_columns);

        for _ in 0..num_columns {
            let len = body.read_i32()?;
            if len == -1 {
                columns.push(None);
            } else if len < 0 {
                return Err(Error::Protocol(format!(
                    "DataRow: negative column length {}",
                    len
                )));
            } else {
                columns.push(Some(body.read_bytes(len as usize)?.to_vec()));
            }
        }

        body.finish()?;
        Ok(Self { columns })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Raw column values.
    pub fn columns(&self) -> &[Option<Vec<u8>>] {
        &self.columns
    }

    /// Take ownership of the raw column values.
    pub fn into_columns(self) -> Vec<Option<Vec<u8>>> {
        self.columns
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: String,
}

impl CommandComplete {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("CommandComplete", payload);
        let tag = body.read_cstr()?.to_string();
        body.finish()?;
        Ok(Self { tag })
    }

    /// Interpret the command tag.
    pub fn status(&self) -> CommandStatus {
        CommandStatus::parse(&self.tag)
    }
}

/// EmptyQueryResponse message - response to an empty query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyQueryResponse;

impl EmptyQueryResponse {
    /// Parse an EmptyQueryResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        ResponseBody::new("EmptyQueryResponse", payload).finish()?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{write_cstr, write_i16, write_i32};

    fn field(out: &mut Vec<u8>, name: &str, table_oid: u32, column_id: i16, type_oid: u32) {
        write_cstr(out, name);
        out.extend_from_slice(&table_oid.to_be_bytes());
        write_i16(out, column_id);
        out.extend_from_slice(&type_oid.to_be_bytes());
        write_i16(out, -1);
        write_i32(out, -1);
        write_i16(out, 0);
    }

    #[test]
    fn test_row_description() {
        let mut body = Vec::new();
        write_i16(&mut body, 2);
        field(&mut body, "city", 16384, 1, 1043);
        field(&mut body, "temp_lo", 16384, 2, 23);

        let description = RowDescription::parse(&body).unwrap();
        assert_eq!(description.len(), 2);

        let city = &description.fields()[0];
        assert_eq!(city.name, "city");
        assert_eq!(city.table_oid, 16384);
        assert_eq!(city.column_id, 1);
        assert_eq!(city.type_oid, 1043);
        assert_eq!(city.type_size, -1);
        assert_eq!(city.type_modifier, -1);
        assert_eq!(city.format, FormatCode::Text);

        assert_eq!(description.fields()[1].name, "temp_lo");
        assert_eq!(description.fields()[1].type_oid, 23);
    }

    #[test]
    fn test_row_description_truncated() {
        let mut body = Vec::new();
        write_i16(&mut body, 1);
        write_cstr(&mut body, "city");
        body.extend_from_slice(&[0; 10]);
        assert!(matches!(RowDescription::parse(&body), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_data_row_with_null() {
        let mut body = Vec::new();
        write_i16(&mut body, 2);
        write_i32(&mut body, 7);
        body.extend_from_slice(b"Hayward");
        write_i32(&mut body, -1);

        let row = DataRow::parse(&body).unwrap();
        assert_eq!(
            row.columns(),
            &[Some(b"Hayward".to_vec()), None]
        );
    }

    #[test]
    fn test_data_row_trailing_bytes() {
        let mut body = Vec::new();
        write_i16(&mut body, 1);
        write_i32(&mut body, 1);
        body.extend_from_slice(b"ab");
        assert!(matches!(DataRow::parse(&body), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_command_complete() {
        let complete = CommandComplete::parse(b"UPDATE 3\0").unwrap();
        assert_eq!(complete.tag, "UPDATE 3");
        assert_eq!(complete.status(), CommandStatus::Update { row_count: 3 });
    }
}
