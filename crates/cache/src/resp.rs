//! RESP2 framing: command encoding and strict reply parsing.
//!
//! Replies are the five RESP2 types: `+simple`, `-error`, `:integer`,
//! `$bulk` (with `$-1` null) and `*array` (with `*-1` null). Framing is
//! enforced strictly — every line must terminate with CRLF and bulk lengths
//! must match exactly.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// A parsed RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Int(i64),
    /// `None` is the null bulk string (`$-1`).
    Bulk(Option<Vec<u8>>),
    /// `None` is the null array (`*-1`).
    Array(Option<Vec<Value>>),
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn protocol_error(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Read one CRLF-terminated line, returning it without the terminator.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let mut buf = Vec::with_capacity(32);
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-reply",
        ));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(protocol_error("reply line not CRLF-terminated"));
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).map_err(|_| protocol_error("reply line is not UTF-8"))
}

/// Read one RESP2 value.
pub async fn read_value<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Value> {
    let line = read_line(reader).await?;
    let (prefix, rest) = line
        .split_at_checked(1)
        .ok_or_else(|| protocol_error("empty reply line"))?;

    match prefix {
        "+" => Ok(Value::Simple(rest.to_string())),
        "-" => Ok(Value::Error(rest.to_string())),
        ":" => rest
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| protocol_error("malformed integer reply")),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| protocol_error("malformed bulk length"))?;
            if len == -1 {
                return Ok(Value::Bulk(None));
            }
            let len =
                usize::try_from(len).map_err(|_| protocol_error("negative bulk length"))?;
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data).await?;
            if !data.ends_with(b"\r\n") {
                return Err(protocol_error("bulk string not CRLF-terminated"));
            }
            data.truncate(len);
            Ok(Value::Bulk(Some(data)))
        }
        "*" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| protocol_error("malformed array length"))?;
            if len == -1 {
                return Ok(Value::Array(None));
            }
            let len =
                usize::try_from(len).map_err(|_| protocol_error("negative array length"))?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(Box::pin(read_value(reader)).await?);
            }
            Ok(Value::Array(Some(items)))
        }
        other => Err(protocol_error(format!("unknown reply prefix {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(input: &[u8]) -> io::Result<Value> {
        let mut reader = BufReader::new(input);
        read_value(&mut reader).await
    }

    #[tokio::test]
    async fn parses_all_reply_types() {
        assert_eq!(parse(b"+OK\r\n").await.unwrap(), Value::Simple("OK".into()));
        assert_eq!(
            parse(b"-ERR wrong type\r\n").await.unwrap(),
            Value::Error("ERR wrong type".into())
        );
        assert_eq!(parse(b":42\r\n").await.unwrap(), Value::Int(42));
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await.unwrap(),
            Value::Bulk(Some(b"hello".to_vec()))
        );
        assert_eq!(parse(b"$-1\r\n").await.unwrap(), Value::Bulk(None));
        assert_eq!(
            parse(b"*2\r\n:1\r\n$2\r\nok\r\n").await.unwrap(),
            Value::Array(Some(vec![Value::Int(1), Value::Bulk(Some(b"ok".to_vec()))]))
        );
        assert_eq!(parse(b"*-1\r\n").await.unwrap(), Value::Array(None));
    }

    #[tokio::test]
    async fn rejects_missing_crlf() {
        assert!(parse(b"+OK\n").await.is_err());
        assert!(parse(b"$5\r\nhelloXX").await.is_err());
    }

    #[tokio::test]
    async fn rejects_length_mismatch() {
        // Length says 5 but only 3 bytes before the terminator.
        assert!(parse(b"$5\r\nabc\r\n").await.is_err());
    }

    #[tokio::test]
    async fn rejects_truncated_stream() {
        assert!(parse(b"").await.is_err());
        assert!(parse(b"$10\r\nshort\r\n").await.is_err());
    }

    #[test]
    fn command_encoding_is_resp_array() {
        let encoded = encode_command(&[b"SET", b"k", b"v", b"PX", b"1000"]);
        assert_eq!(
            encoded,
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$4\r\n1000\r\n"
        );
    }
}
