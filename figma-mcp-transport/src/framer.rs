//! HTTP/1.1 request encoding and response decoding.
//!
//! [`read_response`] is the streaming decoder used on pooled connections. It
//! pulls from a buffered byte source one line or one body span at a time and
//! never buffers more than the caller's body limit.
//!
//! [`parse_complete_response`] and [`parse_if_complete`] handle a response
//! that is already in memory; they are only used for the one-shot
//! DNS-over-HTTPS exchange.

use bytes::Bytes;
use http::Method;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::error::TransportError;
use crate::response::{HeaderList, RawResponse};

/// Longest status, header or chunk-size line accepted.
pub const MAX_LINE_LEN: usize = 16 * 1024;
/// Most header fields accepted in one response.
pub const MAX_HEADERS: usize = 128;

/// Serialize a request.
///
/// `authority` becomes the `Host` header. `Connection: keep-alive` is
/// asserted unless the caller supplied its own `Connection` header. POST
/// always carries `Content-Length`, even for an empty body. Caller-supplied
/// `Host` and `Content-Length` headers are dropped in favor of computed ones.
pub fn encode_request(
    method: &Method,
    authority: &str,
    target: &str,
    headers: &HeaderList,
    body: Option<&[u8]>,
) -> Vec<u8> {
    let body = body.unwrap_or_default();
    let mut req = Vec::with_capacity(256 + body.len());

    req.extend_from_slice(method.as_str().as_bytes());
    req.push(b' ');
    req.extend_from_slice(target.as_bytes());
    req.extend_from_slice(b" HTTP/1.1\r\n");
    push_header(&mut req, "Host", authority);

    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        push_header(&mut req, name, value);
    }

    if !headers.contains("connection") {
        push_header(&mut req, "Connection", "keep-alive");
    }

    if *method == Method::POST || !body.is_empty() {
        push_header(&mut req, "Content-Length", &body.len().to_string());
    }

    req.extend_from_slice(b"\r\n");
    req.extend_from_slice(body);
    req
}

fn push_header(req: &mut Vec<u8>, name: &str, value: &str) {
    req.extend_from_slice(name.as_bytes());
    req.extend_from_slice(b": ");
    req.extend_from_slice(value.as_bytes());
    req.extend_from_slice(b"\r\n");
}

/// How the end of a body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

fn body_framing(status: u16, headers: &HeaderList) -> Result<Framing, TransportError> {
    if status == 204 || status == 304 || (100..200).contains(&status) {
        return Ok(Framing::Empty);
    }
    if let Some(value) = headers.get("content-length") {
        let len = value
            .trim()
            .parse::<usize>()
            .map_err(|_| TransportError::malformed(format!("invalid Content-Length {value:?}")))?;
        return Ok(Framing::Length(len));
    }
    if headers.has_token("transfer-encoding", "chunked") {
        return Ok(Framing::Chunked);
    }
    Ok(Framing::UntilClose)
}

struct Head {
    http10: bool,
    status: u16,
    headers: HeaderList,
}

/// Read one response from `reader`.
///
/// Interim `1xx` responses (except `101`) are skipped. Returns
/// [`TransportError::ConnectionClosed`] when the peer hangs up before the
/// first status byte, which is how an idle pooled connection looks after the
/// server timed it out.
pub async fn read_response<R>(reader: &mut R, max_body: usize) -> Result<RawResponse, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let head = loop {
        let head = read_head(reader).await?;
        if (100..200).contains(&head.status) && head.status != 101 {
            continue;
        }
        break head;
    };

    let framing = body_framing(head.status, &head.headers)?;
    let body = match framing {
        Framing::Empty => Vec::new(),
        Framing::Length(len) => read_exact_body(reader, len, max_body).await?,
        Framing::Chunked => read_chunked_body(reader, max_body).await?,
        Framing::UntilClose => read_to_close(reader, max_body).await?,
    };

    let should_close = head.headers.has_token("connection", "close")
        || framing == Framing::UntilClose
        || (head.http10 && !head.headers.has_token("connection", "keep-alive"));

    Ok(RawResponse::new(
        head.status,
        head.headers,
        Bytes::from(body),
        should_close,
    ))
}

async fn read_head<R>(reader: &mut R) -> Result<Head, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let status_line = match read_line(reader).await {
        Ok(Some(line)) => line,
        Ok(None) => return Err(TransportError::ConnectionClosed),
        Err(TransportError::Io(e)) if is_disconnect(&e) => {
            return Err(TransportError::ConnectionClosed);
        }
        Err(e) => return Err(e),
    };
    let (http10, status) = parse_status_line(&status_line)?;

    let mut headers = HeaderList::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| TransportError::malformed("connection closed inside response headers"))?;
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if !headers.continue_last(line.trim()) {
                return Err(TransportError::malformed("continuation line before first header"));
            }
            continue;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(TransportError::malformed("too many response headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::malformed(format!("invalid header line {line:?}")))?;
        headers.push(name.trim(), value.trim());
    }

    Ok(Head {
        http10,
        status,
        headers,
    })
}

/// Parse `HTTP/x.y <code> <reason>`; returns whether the peer spoke HTTP/1.0.
fn parse_status_line(line: &str) -> Result<(bool, u16), TransportError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .filter(|v| v.starts_with("HTTP/"))
        .ok_or_else(|| TransportError::malformed(format!("invalid status line {line:?}")))?;
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| TransportError::malformed(format!("invalid status code in {line:?}")))?;
    Ok((version == "HTTP/1.0", status))
}

/// Read one CRLF- or LF-terminated line without the terminator.
///
/// `None` means clean end of stream before any byte of the line.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if n > MAX_LINE_LEN {
            return Err(TransportError::malformed("line exceeds length limit"));
        }
        return Err(TransportError::malformed("connection closed mid-line"));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

fn truncated(expected: usize) -> impl FnOnce(io::Error) -> TransportError {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TransportError::malformed(format!("body truncated before {expected} bytes"))
        } else {
            TransportError::Io(err)
        }
    }
}

async fn read_exact_body<R>(reader: &mut R, len: usize, max_body: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    if len > max_body {
        return Err(TransportError::BodyTooLarge { limit: max_body });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(truncated(len))?;
    Ok(body)
}

fn parse_chunk_size(line: &str) -> Result<usize, TransportError> {
    // Extensions after ';' are ignored.
    let field = line.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(field, 16)
        .map_err(|_| TransportError::malformed(format!("invalid chunk size {field:?}")))
}

async fn read_chunked_body<R>(reader: &mut R, max_body: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| TransportError::malformed("connection closed inside chunked body"))?;
        let size = parse_chunk_size(&line)?;

        if size == 0 {
            // Trailer fields up to the blank line.
            while let Some(trailer) = read_line(reader).await? {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        if body.len().saturating_add(size) > max_body {
            return Err(TransportError::BodyTooLarge { limit: max_body });
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(truncated(size))?;

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await.map_err(truncated(2))?;
        if &crlf != b"\r\n" {
            return Err(TransportError::malformed("chunk data not followed by CRLF"));
        }
    }
}

/// Read until the peer closes, failing once more than `max_body` bytes arrive.
///
/// A TLS peer that closes without `close_notify` surfaces as `UnexpectedEof`;
/// that is treated as a normal end of stream here.
pub async fn read_to_close<R>(reader: &mut R, max_body: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    match (&mut *reader)
        .take(max_body as u64 + 1)
        .read_to_end(&mut body)
        .await
    {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(e.into()),
    }
    if body.len() > max_body {
        return Err(TransportError::BodyTooLarge { limit: max_body });
    }
    Ok(body)
}

/// Parse a response that is entirely in `buf`.
///
/// The connection is always reported as `should_close`: this parser is for
/// one-shot exchanges only.
pub fn parse_complete_response(buf: &[u8], max_body: usize) -> Result<RawResponse, TransportError> {
    parse_buffered(buf, max_body, true)?.ok_or_else(|| TransportError::malformed("incomplete response"))
}

/// Parse `buf` if it already holds a response whose end is marked by its own
/// framing.
///
/// `Ok(None)` means more bytes are needed. A response framed by connection
/// close is never complete here; hand the buffer to
/// [`parse_complete_response`] once the peer hangs up.
pub fn parse_if_complete(buf: &[u8], max_body: usize) -> Result<Option<RawResponse>, TransportError> {
    parse_buffered(buf, max_body, false)
}

fn parse_buffered(buf: &[u8], max_body: usize, at_eof: bool) -> Result<Option<RawResponse>, TransportError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut storage);
    let head_len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) if at_eof => {
            return Err(TransportError::malformed("incomplete response head"));
        }
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(TransportError::malformed(e.to_string())),
    };
    let status = parsed
        .code
        .ok_or_else(|| TransportError::malformed("missing status code"))?;

    let headers: HeaderList = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let rest = &buf[head_len..];
    let body = match body_framing(status, &headers)? {
        Framing::Empty => Some(Vec::new()),
        Framing::Length(len) => {
            if len > max_body {
                return Err(TransportError::BodyTooLarge { limit: max_body });
            }
            match rest.get(..len) {
                Some(body) => Some(body.to_vec()),
                None if at_eof => {
                    return Err(TransportError::malformed(format!("body truncated before {len} bytes")));
                }
                None => None,
            }
        }
        Framing::Chunked => match decode_chunked_prefix(rest, max_body)? {
            None if at_eof => return Err(TransportError::malformed("chunked body truncated")),
            body => body,
        },
        Framing::UntilClose => {
            if rest.len() > max_body {
                return Err(TransportError::BodyTooLarge { limit: max_body });
            }
            at_eof.then(|| rest.to_vec())
        }
    };

    Ok(body.map(|body| RawResponse::new(status, headers, Bytes::from(body), true)))
}

/// Decode a complete chunked body held in memory. Trailers are ignored.
pub fn decode_chunked(data: &[u8], max_body: usize) -> Result<Vec<u8>, TransportError> {
    decode_chunked_prefix(data, max_body)?.ok_or_else(|| TransportError::malformed("chunked body truncated"))
}

/// `Ok(None)` when `data` ends before the terminating zero-size chunk.
fn decode_chunked_prefix(mut data: &[u8], max_body: usize) -> Result<Option<Vec<u8>>, TransportError> {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = find_crlf(data) else {
            return Ok(None);
        };
        let size = parse_chunk_size(&String::from_utf8_lossy(&data[..line_end]))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(Some(body));
        }
        if body.len().saturating_add(size) > max_body {
            return Err(TransportError::BodyTooLarge { limit: max_body });
        }
        if data.len() < size + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&data[..size]);
        if &data[size..size + 2] != b"\r\n" {
            return Err(TransportError::malformed("chunk data not followed by CRLF"));
        }
        data = &data[size + 2..];
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
