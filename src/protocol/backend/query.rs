//! Simple and extended query replies.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};

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
    pub format: I16BE,
}

/// RowDescription message - the columns of a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    /// Column names in order
    pub names: Vec<&'a str>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (count, mut data) = read_i16(payload)?;
        let mut names = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_bytes(rest, TAIL_SIZE)?;
            FieldDescriptionTail::ref_from_bytes(tail)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;
            names.push(name);
            data = rest;
        }
        Ok(Self { names })
    }
}

/// DataRow message - a single row of text values.
#[derive(Debug, Clone)]
pub struct DataRow {
    /// Column values; `None` represents NULL
    pub values: Vec<Option<Vec<u8>>>,
}

impl DataRow {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_i16(payload)?;
        let mut values = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let (len, rest) = read_i32(data)?;
            if len < 0 {
                values.push(None);
                data = rest;
                continue;
            }
            let (value, rest) = read_bytes(rest, len as usize)?;
            values.push(Some(value.to_vec()));
            data = rest;
        }
        Ok(Self { values })
    }
}

/// CommandComplete message - a statement finished.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g. "SELECT 5", "INSERT 0 1")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_description_names() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        for name in ["id", "note"] {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&[0; 18]);
        }
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.names, vec!["id", "note"]);
        assert!(RowDescription::parse(&payload[..10]).is_err());
    }

    #[test]
    fn data_row_with_null() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&3_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.values, vec![None, Some(b"abc".to_vec())]);
    }
}
