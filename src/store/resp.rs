//! RESP2 client codec.
//!
//! Requests are always arrays of bulk strings. Replies may be any RESP2 type:
//! - Simple Strings (+)
//! - Errors (-)
//! - Integers (:)
//! - Bulk Strings ($), null as $-1
//! - Arrays (*), null as *-1

use super::command::{CommandReply, ExecutionFault, Reply};

/// Upper bound on a single bulk string (512 MB, the server's own limit)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Upper bound on array elements accepted from the server
pub const MAX_ELEMENTS: usize = 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 8;

/// A decoded RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Array(Vec<RespValue>),
    Null,
}

impl RespValue {
    /// Interpret as the reply to one command
    pub fn into_command_reply(self) -> CommandReply {
        match self {
            RespValue::Error(msg) => Err(ExecutionFault::from_message(msg)),
            RespValue::Null => Ok(Reply::Nil),
            RespValue::Simple(s) if s == "OK" => Ok(Reply::Ok),
            RespValue::Simple(s) => Ok(Reply::Bulk(s)),
            RespValue::Integer(n) => Ok(Reply::Integer(n)),
            RespValue::Bulk(bytes) => Ok(Reply::Bulk(String::from_utf8_lossy(&bytes).into_owned())),
            RespValue::Array(items) => Ok(Reply::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        RespValue::Bulk(b) => String::from_utf8_lossy(&b).into_owned(),
                        RespValue::Simple(s) => s,
                        RespValue::Integer(n) => n.to_string(),
                        other => format!("{:?}", other),
                    })
                    .collect(),
            )),
        }
    }
}

/// Outcome of a parse attempt
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A full value and the number of bytes it occupied
    Complete(RespValue, usize),
    /// Need more bytes
    Incomplete,
    /// The stream is corrupt
    Invalid(String),
}

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Parse one value from the front of `data`
pub fn parse(data: &[u8]) -> ParseResult {
    parse_value(data, 0)
}

fn parse_value(data: &[u8], depth: usize) -> ParseResult {
    if data.is_empty() {
        return ParseResult::Incomplete;
    }
    if depth > MAX_NESTING_DEPTH {
        return ParseResult::Invalid("maximum nesting depth exceeded".to_string());
    }

    let body = &data[1..];
    match data[0] {
        b'+' => parse_line(body, |s| Ok(RespValue::Simple(s.to_string()))),
        b'-' => parse_line(body, |s| Ok(RespValue::Error(s.to_string()))),
        b':' => parse_line(body, |s| {
            s.parse::<i64>()
                .map(RespValue::Integer)
                .map_err(|_| "invalid integer".to_string())
        }),
        b'$' => parse_bulk(body),
        b'*' => parse_array(body, depth),
        other => ParseResult::Invalid(format!("unexpected type byte 0x{:02x}", other)),
    }
}

/// Parse a CRLF-terminated line; consumed count includes the type byte
fn parse_line<F>(body: &[u8], build: F) -> ParseResult
where
    F: FnOnce(&str) -> Result<RespValue, String>,
{
    let Some(pos) = find_crlf(body) else {
        return ParseResult::Incomplete;
    };
    let line = String::from_utf8_lossy(&body[..pos]);
    match build(&line) {
        Ok(value) => ParseResult::Complete(value, pos + 3),
        Err(e) => ParseResult::Invalid(e),
    }
}

fn parse_length(body: &[u8]) -> Result<Option<(i64, usize)>, String> {
    let Some(pos) = find_crlf(body) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&body[..pos]).map_err(|_| "invalid length".to_string())?;
    let len = text.parse::<i64>().map_err(|_| "invalid length".to_string())?;
    Ok(Some((len, pos + 2)))
}

fn parse_bulk(body: &[u8]) -> ParseResult {
    let (len, header) = match parse_length(body) {
        Ok(Some(v)) => v,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Invalid(e),
    };
    if len == -1 {
        return ParseResult::Complete(RespValue::Null, header + 1);
    }
    if len < 0 {
        return ParseResult::Invalid("invalid bulk string length".to_string());
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return ParseResult::Invalid(format!("bulk string too large: {} > {}", len, MAX_BULK_SIZE));
    }

    let end = header + len;
    if body.len() < end + 2 {
        return ParseResult::Incomplete;
    }
    if &body[end..end + 2] != b"\r\n" {
        return ParseResult::Invalid("missing CRLF after bulk string".to_string());
    }
    ParseResult::Complete(RespValue::Bulk(body[header..end].to_vec()), end + 3)
}

fn parse_array(body: &[u8], depth: usize) -> ParseResult {
    let (len, header) = match parse_length(body) {
        Ok(Some(v)) => v,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Invalid(e),
    };
    if len == -1 {
        return ParseResult::Complete(RespValue::Null, header + 1);
    }
    if len < 0 {
        return ParseResult::Invalid("invalid array length".to_string());
    }
    let len = len as usize;
    if len > MAX_ELEMENTS {
        return ParseResult::Invalid(format!("array too large: {} > {}", len, MAX_ELEMENTS));
    }

    let mut items = Vec::with_capacity(len.min(64));
    let mut offset = header;
    for _ in 0..len {
        match parse_value(&body[offset..], depth + 1) {
            ParseResult::Complete(value, used) => {
                items.push(value);
                offset += used;
            }
            other => return other,
        }
    }
    ParseResult::Complete(RespValue::Array(items), offset + 1)
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
