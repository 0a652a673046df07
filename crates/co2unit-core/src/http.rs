//! Minimal HTTP client interface used by the sync engine, plus the
//! HTTP/1.1 framing board clients use to speak it over a raw socket.

use alloc::{format, string::String, vec::Vec};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            body: body.to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpError {
    InvalidUrl,
    Dns,
    Connect,
    Timeout,
    Io,
    /// Malformed or unsupported response framing.
    Protocol,
    ResponseTooLarge,
}

#[allow(async_fn_in_trait)]
pub trait HttpClient {
    async fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<HttpResponse, HttpError>;
}

/// Largest response a client buffers, headers included.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024;

/// Parts of a plain `http://` URL.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Result<Self, HttpError> {
        let rest = url.strip_prefix("http://").ok_or(HttpError::InvalidUrl)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| HttpError::InvalidUrl)?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(HttpError::InvalidUrl);
        }
        Ok(Self { host, port, path })
    }
}

/// Request line and headers. One request per connection.
pub fn request_head(method: Method, url: &Url<'_>, body_len: usize) -> String {
    let host = if url.port == 80 {
        String::from(url.host)
    } else {
        format!("{}:{}", url.host, url.port)
    };
    format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: co2unit\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
        method.as_str(),
        url.path,
        host,
        body_len
    )
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses a complete response read up to connection close.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse, HttpError> {
    let head_end = find(raw, b"\r\n\r\n").ok_or(HttpError::Protocol)?;
    let head = core::str::from_utf8(&raw[..head_end]).map_err(|_| HttpError::Protocol)?;
    let mut lines = head.split("\r\n");

    let mut status_line = lines.next().unwrap_or_default().split_whitespace();
    if !status_line.next().is_some_and(|v| v.starts_with("HTTP/1.")) {
        return Err(HttpError::Protocol);
    }
    let status: u16 = status_line
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or(HttpError::Protocol)?;

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(value.parse::<usize>().map_err(|_| HttpError::Protocol)?);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.eq_ignore_ascii_case("chunked");
        }
    }

    let body = &raw[head_end + 4..];
    let body = if chunked {
        decode_chunked(body)?
    } else if let Some(len) = content_length {
        body.get(..len).ok_or(HttpError::Protocol)?.to_vec()
    } else {
        body.to_vec()
    };
    Ok(HttpResponse { status, body })
}

fn decode_chunked(mut body: &[u8]) -> Result<Vec<u8>, HttpError> {
    let mut out = Vec::new();
    loop {
        let line_end = find(body, b"\r\n").ok_or(HttpError::Protocol)?;
        let size_line = core::str::from_utf8(&body[..line_end]).map_err(|_| HttpError::Protocol)?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| HttpError::Protocol)?;
        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        let chunk = body.get(..size).ok_or(HttpError::Protocol)?;
        out.extend_from_slice(chunk);
        body = body
            .get(size..)
            .and_then(|rest| rest.strip_prefix(b"\r\n"))
            .ok_or(HttpError::Protocol)?;
    }
}
