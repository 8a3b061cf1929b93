//! # RESP2 framing
//!
//! [`RespCodec`] is the server half: it turns bytes from a client into
//! [`Request`]s and writes [`Reply`]s back. [`RespClientCodec`] is the client
//! half and is mostly useful for tests and small tools.
//!
//! ## Requests
//!
//! A request is either a multibulk array of bulk strings
//!
//! ```text
//! *2\r\n$3\r\nGET\r\n$6\r\norders\r\n
//! ```
//!
//! or an inline command: a single line of whitespace separated words ending
//! in `\n` (optionally `\r\n`). Inline commands do not support quoting.
//! Empty arrays and blank inline lines are consumed and skipped.
//!
//! Decoded arguments are slices of the read buffer and are never copied. A
//! multibulk request that arrives in pieces is parsed incrementally: elements
//! already scanned are not scanned again when more bytes arrive.
//!
//! ## Limits
//!
//! Frames beyond the configured [`Limits`] are rejected with
//! [`Error::Protocol`] before their payload is buffered, so a client cannot
//! make the server allocate an arbitrary amount of memory by announcing a
//! huge length.

use crate::{Error, Reply, Request, Result};
use bytes::{Buf, BufMut, BytesMut};
use core::ops::Range;
use tokio_util::codec::{Decoder, Encoder};

/// Most elements accepted in one multibulk request.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Largest bulk string accepted, in bytes.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Longest inline command line accepted, in bytes.
pub const MAX_INLINE_LEN: usize = 64 * 1024;

// `*`/`$` plus an i64 and some slack. Anything longer is garbage.
const MAX_LENGTH_LINE: usize = 32;

const CRLF: &[u8] = b"\r\n";

/// Size limits enforced while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_array_len: usize,
    pub max_bulk_len: usize,
    pub max_inline_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_array_len: MAX_ARRAY_LEN,
            max_bulk_len: MAX_BULK_LEN,
            max_inline_len: MAX_INLINE_LEN,
        }
    }
}

/// Server side codec: decodes [`Request`]s, encodes [`Reply`]s.
#[derive(Debug, Clone, Default)]
pub struct RespCodec {
    limits: Limits,
    partial: Option<PartialMultibulk>,
}

impl RespCodec {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            partial: None,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }
}

/// Client side codec: encodes [`Request`]s, decodes [`Reply`]s.
#[derive(Debug, Clone, Default)]
pub struct RespClientCodec {
    limits: Limits,
}

impl RespClientCodec {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }
}

/// Progress through a multibulk request whose bytes have not all arrived.
/// Offsets are relative to the front of the read buffer, which does not move
/// until the frame is complete.
#[derive(Debug, Clone)]
struct PartialMultibulk {
    count: usize,
    pos: usize,
    parts: Vec<Range<usize>>,
}

/// Outcome of scanning the front of a read buffer. Ranges index into the
/// buffer as it was scanned.
enum Frame {
    Incomplete,
    Skip(usize),
    Command {
        consumed: usize,
        parts: Vec<Range<usize>>,
    },
}

impl Decoder for RespCodec {
    type Item = Request;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>> {
        loop {
            let Some(&first) = src.first() else {
                return Ok(None);
            };

            let frame = if self.partial.is_some() || first == b'*' {
                scan_multibulk(src, &self.limits, &mut self.partial)?
            } else {
                scan_inline(src, &self.limits)?
            };

            match frame {
                Frame::Incomplete => return Ok(None),
                Frame::Skip(consumed) => src.advance(consumed),
                Frame::Command { consumed, parts } => {
                    let frame = src.split_to(consumed).freeze();
                    let mut parts = parts.into_iter().map(|range| frame.slice(range));
                    let Some(command) = parts.next() else {
                        continue;
                    };
                    return Ok(Some(Request::new(command, parts.collect())));
                }
            }
        }
    }
}

impl Encoder<Reply> for RespCodec {
    type Error = Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<()> {
        match reply {
            Reply::Status(text) => write_simple(dst, b'+', &text),
            Reply::Error(text) => write_simple(dst, b'-', &text),
            Reply::Integer(n) => write_header(dst, b':', n),
            Reply::Bulk(Some(data)) => write_bulk(dst, &data),
            Reply::Bulk(None) => dst.extend_from_slice(b"$-1\r\n"),
        }
        Ok(())
    }
}

impl Encoder<Request> for RespClientCodec {
    type Error = Error;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<()> {
        write_header(dst, b'*', request.len() as i64);
        write_bulk(dst, request.command());
        for arg in request.args() {
            write_bulk(dst, arg);
        }
        Ok(())
    }
}

impl Decoder for RespClientCodec {
    type Item = Reply;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };
        let Some(line_end) = find_crlf(src, 1) else {
            if src.len() > self.limits.max_inline_len {
                return Err(Error::protocol("reply line too long"));
            }
            return Ok(None);
        };
        let line = &src[1..line_end];

        let reply = match first {
            b'+' => Reply::Status(String::from_utf8_lossy(line).into_owned()),
            b'-' => Reply::Error(String::from_utf8_lossy(line).into_owned()),
            b':' => Reply::Integer(
                parse_i64(line).ok_or_else(|| Error::protocol("invalid integer reply"))?,
            ),
            b'$' => {
                let len = parse_i64(line).ok_or_else(|| Error::protocol("invalid bulk length"))?;
                if len == -1 {
                    src.advance(line_end + CRLF.len());
                    return Ok(Some(Reply::Bulk(None)));
                }
                let len = bulk_len(len, &self.limits)?;

                let start = line_end + CRLF.len();
                let end = start + len;
                if src.len() < end + CRLF.len() {
                    src.reserve(end + CRLF.len() - src.len());
                    return Ok(None);
                }
                if &src[end..end + CRLF.len()] != CRLF {
                    return Err(Error::protocol("bulk reply is not terminated by CRLF"));
                }
                let frame = src.split_to(end + CRLF.len()).freeze();
                return Ok(Some(Reply::Bulk(Some(frame.slice(start..end)))));
            }
            other => {
                return Err(Error::protocol(format!(
                    "unsupported reply type '{}'",
                    other.escape_ascii()
                )));
            }
        };

        src.advance(line_end + CRLF.len());
        Ok(Some(reply))
    }
}

/// Scans a multibulk request, resuming from `partial` if an earlier call ran
/// out of bytes part way through. On `Incomplete` the progress made is left in
/// `partial`; on any other outcome `partial` is cleared.
fn scan_multibulk(
    buf: &[u8],
    limits: &Limits,
    partial: &mut Option<PartialMultibulk>,
) -> Result<Frame> {
    let mut state = match partial.take() {
        Some(state) => state,
        None => {
            let Some((count, pos)) = length_line(buf, 0)? else {
                return Ok(Frame::Incomplete);
            };
            // `*0` and the null array `*-1` carry no command.
            if count <= 0 {
                return Ok(Frame::Skip(pos));
            }
            let count = usize::try_from(count)
                .ok()
                .filter(|count| *count <= limits.max_array_len)
                .ok_or_else(|| Error::protocol(format!("invalid multibulk length {count}")))?;
            PartialMultibulk {
                count,
                pos,
                parts: Vec::with_capacity(count.min(64)),
            }
        }
    };

    while state.parts.len() < state.count {
        let Some(part) = scan_bulk(buf, state.pos, limits)? else {
            *partial = Some(state);
            return Ok(Frame::Incomplete);
        };
        state.pos = part.end + CRLF.len();
        state.parts.push(part);
    }

    Ok(Frame::Command {
        consumed: state.pos,
        parts: state.parts,
    })
}

/// Scans one `$<len>\r\n<bytes>\r\n` element starting at `pos`, returning the
/// range of its payload.
fn scan_bulk(buf: &[u8], pos: usize, limits: &Limits) -> Result<Option<Range<usize>>> {
    let Some(&prefix) = buf.get(pos) else {
        return Ok(None);
    };
    if prefix != b'$' {
        return Err(Error::protocol(format!(
            "expected '$', got '{}'",
            prefix.escape_ascii()
        )));
    }
    let Some((len, start)) = length_line(buf, pos)? else {
        return Ok(None);
    };
    let end = start + bulk_len(len, limits)?;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::protocol("bulk string is not terminated by CRLF"));
    }
    Ok(Some(start..end))
}

fn scan_inline(buf: &[u8], limits: &Limits) -> Result<Frame> {
    let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
        if buf.len() > limits.max_inline_len {
            return Err(Error::protocol("too big inline request"));
        }
        return Ok(Frame::Incomplete);
    };
    if newline > limits.max_inline_len {
        return Err(Error::protocol("too big inline request"));
    }

    // A trailing `\r` counts as whitespace and is dropped with the rest.
    let line = &buf[..newline];
    let mut parts = Vec::new();
    let mut i = 0;
    while i < line.len() {
        if line[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        while i < line.len() && !line[i].is_ascii_whitespace() {
            i += 1;
        }
        parts.push(start..i);
    }

    let consumed = newline + 1;
    if parts.is_empty() {
        Ok(Frame::Skip(consumed))
    } else {
        Ok(Frame::Command { consumed, parts })
    }
}

/// Parses a `<prefix><i64>\r\n` line starting at `start`. Returns the value
/// and the offset just past the CRLF.
fn length_line(buf: &[u8], start: usize) -> Result<Option<(i64, usize)>> {
    let Some(line_end) = find_crlf(buf, start + 1) else {
        if buf.len() - start > MAX_LENGTH_LINE {
            return Err(Error::protocol("length line too long"));
        }
        return Ok(None);
    };
    let value = parse_i64(&buf[start + 1..line_end])
        .ok_or_else(|| Error::protocol("invalid length"))?;
    Ok(Some((value, line_end + CRLF.len())))
}

fn bulk_len(len: i64, limits: &Limits) -> Result<usize> {
    usize::try_from(len)
        .ok()
        .filter(|len| *len <= limits.max_bulk_len)
        .ok_or_else(|| Error::protocol(format!("invalid bulk length {len}")))
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .map(|offset| from + offset)
}

fn parse_i64(digits: &[u8]) -> Option<i64> {
    core::str::from_utf8(digits).ok()?.parse().ok()
}

fn write_header(dst: &mut BytesMut, prefix: u8, n: i64) {
    dst.put_u8(prefix);
    dst.extend_from_slice(n.to_string().as_bytes());
    dst.extend_from_slice(CRLF);
}

/// Status and error lines cannot contain CR or LF; they become spaces.
fn write_simple(dst: &mut BytesMut, prefix: u8, text: &str) {
    dst.reserve(text.len() + 3);
    dst.put_u8(prefix);
    dst.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    dst.extend_from_slice(CRLF);
}

fn write_bulk(dst: &mut BytesMut, data: &[u8]) {
    write_header(dst, b'$', data.len() as i64);
    dst.extend_from_slice(data);
    dst.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests;
