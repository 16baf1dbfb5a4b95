//! COPY protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::{read_i16, read_u8};

/// CopyInResponse or CopyOutResponse.
#[derive(Debug, Clone, Copy)]
pub struct CopyResponse {
    /// Whether the overall format is binary
    pub binary: bool,
    /// Number of columns being copied
    pub columns: i16,
}

impl CopyResponse {
    /// Parse either response from payload bytes; both share one layout.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let (columns, _) = read_i16(rest)?;
        Ok(Self {
            binary: format == 1,
            columns,
        })
    }
}
