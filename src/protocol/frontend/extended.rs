//! Extended query protocol messages, text format only.

use crate::protocol::codec::MessageBuilder;

/// Write a Parse message. Parameter types are left for the server to infer.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(0);
    msg.finish();
}

/// Write a Bind message for the unnamed portal.
///
/// Parameters and results both travel as text; `None` is SQL NULL.
pub fn write_bind(buf: &mut Vec<u8>, statement: &str, params: &[Option<&str>]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr("");
    msg.write_cstr(statement);
    // No format codes: everything is text.
    msg.write_i16(0);
    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(value) => {
                msg.write_i32(value.len() as i32);
                msg.write_bytes(value.as_bytes());
            }
            None => msg.write_i32(-1),
        }
    }
    msg.write_i16(0);
    msg.finish();
}

/// Write a Describe message for the unnamed portal.
pub fn write_describe_portal(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr("");
    msg.finish();
}

/// Write an Execute message for the unnamed portal, fetching all rows.
pub fn write_execute(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr("");
    msg.write_i32(0);
    msg.finish();
}

/// Write a Sync message.
///
/// Ends an extended query sequence; the server answers with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_encodes_null() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "q", &[Some("7"), None]);
        assert_eq!(buf[0], b'B');
        // portal "", statement "q", 0 formats, 2 params
        assert_eq!(&buf[5..12], b"\0q\0\0\0\0\x02");
        assert_eq!(&buf[12..17], b"\0\0\0\x017");
        assert_eq!(&buf[17..21], &(-1_i32).to_be_bytes());
    }

    #[test]
    fn sync_and_execute() {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        assert_eq!(buf, [b'S', 0, 0, 0, 4]);

        buf.clear();
        write_execute(&mut buf);
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 9);
    }
}
