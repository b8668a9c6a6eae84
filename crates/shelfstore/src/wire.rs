//! RESP2 framing shared by the networked store and the daemon listener

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Largest bulk payload accepted from the wire (512 MiB)
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest array accepted from the wire
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest simple string, error or length line accepted
const MAX_LINE_LEN: usize = 64 * 1024;

/// A single RESP2 value
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$3\r\nfoo\r\n`, or `$-1\r\n` for nil
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, or `*-1\r\n` for nil
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// `+OK`
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// Nil bulk string
    pub fn nil() -> Self {
        Frame::Bulk(None)
    }

    /// Bulk string from anything byte-like
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    /// `-ERR <message>`
    pub fn error(message: impl std::fmt::Display) -> Self {
        Frame::Error(format!("ERR {}", message))
    }

    /// Client command: an array of bulk strings
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Frame::Array(Some(parts.into_iter().map(Frame::bulk).collect()))
    }

    /// Payload of a simple or bulk string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Simple(s) => Some(s.as_bytes()),
            Frame::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Append the wire encoding to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(dst, b'+', s.as_bytes()),
            Frame::Error(e) => put_line(dst, b'-', e.as_bytes()),
            Frame::Integer(n) => put_line(dst, b':', n.to_string().as_bytes()),
            Frame::Bulk(None) => dst.put_slice(b"$-1\r\n"),
            Frame::Bulk(Some(data)) => {
                put_line(dst, b'$', data.len().to_string().as_bytes());
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(None) => dst.put_slice(b"*-1\r\n"),
            Frame::Array(Some(items)) => {
                put_line(dst, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    /// Wire encoding as a fresh buffer
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the frame is not
    /// complete yet; on success the frame's bytes are consumed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
        let mut reader = Reader { data: &buf[..], pos: 0 };
        match reader.frame()? {
            Some(frame) => {
                let used = reader.pos;
                buf.advance(used);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

fn put_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn frame(&mut self) -> Result<Option<Frame>> {
        let Some(&tag) = self.data.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        match tag {
            b'+' => Ok(self.text()?.map(Frame::Simple)),
            b'-' => Ok(self.text()?.map(Frame::Error)),
            b':' => Ok(self.number()?.map(Frame::Integer)),
            b'$' => self.bulk(),
            b'*' => self.array(),
            other => Err(Error::Protocol(format!(
                "unknown frame type byte {:?}",
                other as char
            ))),
        }
    }

    fn bulk(&mut self) -> Result<Option<Frame>> {
        let Some(len) = self.number()? else {
            return Ok(None);
        };
        if len < 0 {
            return Ok(Some(Frame::Bulk(None)));
        }

        let len = len as usize;
        if len > MAX_BULK_LEN {
            return Err(Error::Protocol(format!(
                "bulk string of {} bytes exceeds {} byte limit",
                len, MAX_BULK_LEN
            )));
        }

        let end = self.pos + len;
        if self.data.len() < end + 2 {
            return Ok(None);
        }
        if &self.data[end..end + 2] != b"\r\n" {
            return Err(Error::Protocol("bulk string not terminated by CRLF".into()));
        }

        let payload = self.data[self.pos..end].to_vec();
        self.pos = end + 2;
        Ok(Some(Frame::Bulk(Some(payload))))
    }

    fn array(&mut self) -> Result<Option<Frame>> {
        let Some(len) = self.number()? else {
            return Ok(None);
        };
        if len < 0 {
            return Ok(Some(Frame::Array(None)));
        }

        let len = len as usize;
        if len > MAX_ARRAY_LEN {
            return Err(Error::Protocol(format!(
                "array of {} elements exceeds {} element limit",
                len, MAX_ARRAY_LEN
            )));
        }

        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            match self.frame()? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(Frame::Array(Some(items))))
    }

    fn number(&mut self) -> Result<Option<i64>> {
        match self.text()? {
            Some(line) => line
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Error::Protocol(format!("invalid integer {:?}", line))),
            None => Ok(None),
        }
    }

    fn text(&mut self) -> Result<Option<String>> {
        let rest = &self.data[self.pos..];
        let Some(idx) = rest.windows(2).position(|w| w == b"\r\n") else {
            if rest.len() > MAX_LINE_LEN {
                return Err(Error::Protocol(format!(
                    "line exceeds {} bytes without a terminator",
                    MAX_LINE_LEN
                )));
            }
            return Ok(None);
        };
        if idx > MAX_LINE_LEN {
            return Err(Error::Protocol(format!(
                "line of {} bytes exceeds {}",
                idx, MAX_LINE_LEN
            )));
        }

        let line = String::from_utf8(rest[..idx].to_vec())
            .map_err(|_| Error::Protocol("line is not valid UTF-8".into()))?;
        self.pos += idx + 2;
        Ok(Some(line))
    }
}
