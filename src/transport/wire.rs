//! HTTP/1.1 wire format: request serialization and response parsing.
//!
//! The engine owns its wire exchange so the pool can hand the same TCP/TLS
//! stream to consecutive requests and so proxied requests can switch between
//! origin-form and absolute-form request targets. Parsing handles the three
//! HTTP/1.x body framings: `Content-Length`, chunked transfer coding, and
//! read-to-close.

use std::io::Read;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use url::Url;

use crate::transport::error::TransportErrorKind;
use crate::transport::message::{HeaderMap, Request};

/// Upper bound on a single status/header line. A server pushing more than
/// this in one line is not speaking HTTP.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// URL scheme of a target, restricted to what the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub(crate) fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub(crate) fn is_tls(self) -> bool {
        matches!(self, Self::Https)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// A parsed request target: everything the transport needs from a URL.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path_and_query: String,
}

impl Target {
    /// Parses a URL string into a wire target.
    pub(crate) fn parse(raw: &str) -> Result<Self, TransportErrorKind> {
        let invalid = || TransportErrorKind::InvalidUrl {
            url: raw.to_string(),
        };

        let url = Url::parse(raw).map_err(|_| invalid())?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid()),
        };
        let host = url.host_str().ok_or_else(invalid)?.to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let mut path_and_query = url.path().to_string();
        if path_and_query.is_empty() {
            path_and_query.push('/');
        }
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Ok(Self {
            scheme,
            host,
            port,
            path_and_query,
        })
    }

    /// Value for the `Host` header: port elided when it is the scheme default.
    pub(crate) fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

}

/// Serializes a request onto the wire.
///
/// `absolute_form` selects the absolute-URI request target used when speaking
/// plain HTTP through a forward proxy; tunneled and direct exchanges use
/// origin-form. A `Host` header is added only when the request does not
/// already carry one, so mangled requests keep full header control.
pub(crate) fn serialize_request(request: &Request, target: &Target, absolute_form: bool) -> Vec<u8> {
    let request_target = if absolute_form {
        format!(
            "{}://{}{}",
            target.scheme.as_str(),
            target.host_header(),
            target.path_and_query
        )
    } else {
        target.path_and_query.clone()
    };

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(request.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request_target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    if !request.headers.contains("host") {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(target.host_header().as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    for (name, value) in request.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");

    if let Some(body) = &request.body {
        out.extend_from_slice(body);
    }
    out
}

/// A response as parsed off the wire, before id assignment and decompression.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Whether the connection may carry another exchange afterwards.
    pub reusable: bool,
}

/// Reads one full HTTP response off the stream.
///
/// `head_request` suppresses body reading for HEAD exchanges, where framing
/// headers describe a body that is never sent.
pub(crate) async fn read_response<R>(
    reader: &mut BufReader<R>,
    url: &str,
    head_request: bool,
    max_body: usize,
) -> Result<RawResponse, TransportErrorKind>
where
    R: AsyncRead + Unpin,
{
    let malformed = |reason: &str| TransportErrorKind::MalformedResponse {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let status_line = read_line(reader, url).await?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(malformed("unrecognized HTTP version in status line"));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed("unparseable status code"))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader, url).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(malformed("header line without a colon"));
        };
        headers.append(name.trim(), value.trim());
    }

    // HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close.
    let connection = headers.get("connection").map(str::to_ascii_lowercase);
    let mut reusable = if version == "HTTP/1.1" {
        connection.as_deref() != Some("close")
    } else {
        connection.as_deref() == Some("keep-alive")
    };

    let bodyless = head_request || status == 204 || status == 304 || (100..200).contains(&status);
    let body = if bodyless {
        Vec::new()
    } else if headers
        .get("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        read_chunked_body(reader, url, max_body).await?
    } else if let Some(raw_len) = headers.get("content-length") {
        let len: usize = raw_len
            .trim()
            .parse()
            .map_err(|_| malformed("unparseable Content-Length"))?;
        if len > max_body {
            return Err(TransportErrorKind::ResponseTooLarge {
                url: url.to_string(),
                limit: max_body,
            });
        }
        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| io_to_kind(&e, url))?;
        body
    } else {
        // No framing headers: the body runs to connection close.
        reusable = false;
        let mut body = Vec::new();
        reader
            .take(max_body as u64 + 1)
            .read_to_end(&mut body)
            .await
            .map_err(|e| io_to_kind(&e, url))?;
        if body.len() > max_body {
            return Err(TransportErrorKind::ResponseTooLarge {
                url: url.to_string(),
                limit: max_body,
            });
        }
        body
    };

    Ok(RawResponse {
        status,
        reason,
        headers,
        body,
        reusable,
    })
}

/// Reads a chunked transfer-coded body, including discarding trailers.
async fn read_chunked_body<R>(
    reader: &mut BufReader<R>,
    url: &str,
    max_body: usize,
) -> Result<Vec<u8>, TransportErrorKind>
where
    R: AsyncRead + Unpin,
{
    let malformed = |reason: &str| TransportErrorKind::MalformedResponse {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let mut body = Vec::new();
    loop {
        let size_line = read_line(reader, url).await?;
        let size_field = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| malformed("unparseable chunk size"))?;

        if size == 0 {
            // Trailer section runs to the first empty line.
            loop {
                if read_line(reader, url).await?.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        // Hostile servers advertise absurd chunk sizes; the comparison must
        // not overflow.
        if size > max_body.saturating_sub(body.len()) {
            return Err(TransportErrorKind::ResponseTooLarge {
                url: url.to_string(),
                limit: max_body,
            });
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|e| io_to_kind(&e, url))?;

        let mut crlf = [0u8; 2];
        reader
            .read_exact(&mut crlf)
            .await
            .map_err(|e| io_to_kind(&e, url))?;
        if &crlf != b"\r\n" {
            return Err(malformed("chunk data not terminated by CRLF"));
        }
    }
}

/// Reads one CRLF-terminated line, tolerating bare LF, with a length guard.
async fn read_line<R>(reader: &mut BufReader<R>, url: &str) -> Result<String, TransportErrorKind>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let mut limited = reader.take(MAX_LINE_BYTES as u64 + 1);
    limited
        .read_until(b'\n', &mut raw)
        .await
        .map_err(|e| io_to_kind(&e, url))?;

    if raw.len() > MAX_LINE_BYTES {
        return Err(TransportErrorKind::MalformedResponse {
            url: url.to_string(),
            reason: "header line exceeds length limit".to_string(),
        });
    }
    if raw.is_empty() {
        return Err(TransportErrorKind::ConnectionReset {
            url: url.to_string(),
        });
    }
    while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
        raw.pop();
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn io_to_kind(error: &std::io::Error, url: &str) -> TransportErrorKind {
    TransportErrorKind::from_io(error, url, "", 0)
}

/// Decompresses a response body according to its `Content-Encoding`.
///
/// `deflate` is tried as zlib first and falls back to a raw stream; servers
/// disagree on which one the token means. Unknown encodings pass through
/// unchanged.
pub(crate) fn decompress_body(encoding: &str, body: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(body).read_to_end(&mut out)?;
            Ok(Some(out))
        }
        "deflate" => {
            let mut out = Vec::new();
            match flate2::read::ZlibDecoder::new(body).read_to_end(&mut out) {
                Ok(_) => Ok(Some(out)),
                Err(_) => {
                    out.clear();
                    flate2::read::DeflateDecoder::new(body).read_to_end(&mut out)?;
                    Ok(Some(out))
                }
            }
        }
        _ => Ok(None),
    }
}
