//! Just enough HTTP/1.1 for the captive portal and the update check

use alloc::string::String;
use core::fmt::Write;

use thiserror_no_std::Error;

/// Largest request the portal buffers, headers and body included.
pub const MAX_REQUEST_SIZE: usize = 2048;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("request is not valid UTF-8")]
    NotUtf8,
    #[error("malformed request line")]
    Malformed,
    #[error("missing Content-Length")]
    MissingContentLength,
    #[error("request exceeds the portal buffer")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    /// Path without the query string
    pub path: &'a str,
    pub body: &'a [u8],
}

/// Parse a buffered request, `Ok(None)` while more bytes are needed
pub fn parse_request(buf: &[u8]) -> Result<Option<Request<'_>>, HttpError> {
    let Some(header_end) = header_end(buf) else {
        return if buf.len() >= MAX_REQUEST_SIZE {
            Err(HttpError::TooLarge)
        } else {
            Ok(None)
        };
    };

    let head = core::str::from_utf8(&buf[..header_end]).map_err(|_| HttpError::NotUtf8)?;
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or("").split_whitespace();
    let (Some(method), Some(target), Some(version)) = (
        request_line.next(),
        request_line.next(),
        request_line.next(),
    ) else {
        return Err(HttpError::Malformed);
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed);
    }
    let path = target.split('?').next().unwrap_or(target);

    let content_length = content_length_in(lines);

    let body_len = match (method, content_length) {
        (_, Some(len)) => len,
        ("POST" | "PUT", None) => return Err(HttpError::MissingContentLength),
        _ => 0,
    };

    let body_end = header_end
        .checked_add(body_len)
        .filter(|end| *end <= MAX_REQUEST_SIZE)
        .ok_or(HttpError::TooLarge)?;
    let Some(body) = buf.get(header_end..body_end) else {
        return Ok(None);
    };

    Ok(Some(Request { method, path, body }))
}

/// Offset of the first body byte, once the blank line has arrived
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// `Content-Length` of a buffered response head
pub fn content_length(head: &[u8]) -> Option<usize> {
    let head = core::str::from_utf8(&head[..header_end(head)?]).ok()?;
    content_length_in(head.lines().skip(1))
}

fn content_length_in<'a>(mut lines: impl Iterator<Item = &'a str>) -> Option<usize> {
    lines
        .find_map(|line| {
            line.split_once(':')
                .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        })
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Status line and headers of a response with a `length` byte body
pub fn response_head(status: &str, content_type: &str, length: usize) -> String {
    let mut head = String::with_capacity(128);
    let _ = write!(
        head,
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\
         \r\n",
        status, content_type, length
    );
    head
}

/// A `GET` request carrying one extra header
pub fn get_request(host: &str, path: &str, header: (&str, &str)) -> String {
    let mut request = String::with_capacity(128);
    let _ = write!(
        request,
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         {}: {}\r\n\
         Connection: close\r\n\
         \r\n",
        path, host, header.0, header.1
    );
    request
}

/// Status code of a buffered response
pub fn status_code(response: &[u8]) -> Option<u16> {
    let line_end = response.windows(2).position(|w| w == b"\r\n")?;
    let line = core::str::from_utf8(&response[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Split `http://host[:port]/path` into its parts
pub fn split_url(url: &str) -> Option<(&str, u16, &str)> {
    let rest = url.strip_prefix("http://")?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (authority, 80),
    };
    if host.is_empty() {
        return None;
    }
    Some((host, port, path))
}
