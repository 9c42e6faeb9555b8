//! HTTP/1.1 framing: request bytes out, response heads in.

use std::collections::HashMap;

use crate::{Error, Result, models::RangeSpec, url_ref::UrlRef};

/// Headers owned by the codec; caller-supplied copies are dropped.
const RESERVED_HEADERS: &[&str] = &["host", "connection", "range"];

/// Status line, headers and any body bytes that arrived together with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status_code: u16,
    pub status_text: String,
    /// Lower-cased names; the last duplicate wins.
    pub headers: HashMap<String, String>,
    pub body_prefix: Vec<u8>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.parse().ok()
    }

    pub fn accepts_ranges(&self) -> bool {
        self.headers.contains_key("accept-ranges")
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location").filter(|location| !location.is_empty())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// The `filename` pair of `content-disposition`, quotes stripped.
    pub fn suggested_filename(&self) -> Option<String> {
        self.header("content-disposition")?
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
            .map(|(_, value)| value.trim().trim_matches('"').to_string())
            .filter(|name| !name.is_empty())
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    #[inline]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307 | 308)
    }
}

/// Builds a `GET` request.
///
/// Header order: host, `connection: close`, the optional range, then `extra_headers` as given.
pub fn build_request(
    url: &UrlRef,
    extra_headers: &[(String, String)],
    range: Option<RangeSpec>,
) -> Vec<u8> {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nhost: {}\r\nconnection: close\r\n",
        url.path(),
        url.authority()
    );

    if let Some(range) = range {
        request.push_str(&format!("range: {}\r\n", range.header_value()));
    }

    for (name, value) in extra_headers {
        let name = name.trim();
        if RESERVED_HEADERS.iter().any(|reserved| name.eq_ignore_ascii_case(reserved)) {
            tracing::debug!("Skipping caller header `{name}`, it is set by the request builder");
            continue;
        }
        request.push_str(&format!("{name}: {}\r\n", value.trim()));
    }

    request.push_str("\r\n");
    request.into_bytes()
}

/// Returns `(head_len, separator_len)` for the first blank line in `buf`.
pub fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));

    match (crlf, lf) {
        (Some(crlf), Some(lf)) => Some(if lf.0 < crlf.0 { lf } else { crlf }),
        (crlf, lf) => crlf.or(lf),
    }
}

pub fn parse_response(raw: &[u8]) -> Result<ResponseHead> {
    let (head_len, separator_len) = find_head_end(raw)
        .ok_or_else(|| Error::MalformedResponse("header terminator not found".into()))?;

    let head = String::from_utf8_lossy(&raw[..head_len]);
    let mut lines = head.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| Error::MalformedResponse("empty status line".into()))?;

    let mut tokens = status_line.trim().splitn(3, ' ');
    let version = tokens.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(Error::MalformedResponse(format!("bad status line `{status_line}`")));
    }
    let status_code = tokens
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::MalformedResponse(format!("bad status code in `{status_line}`")))?;
    let status_text = tokens.next().unwrap_or_default().trim().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(ResponseHead {
        status_code,
        status_text,
        headers,
        body_prefix: raw[head_len + separator_len..].to_vec(),
    })
}
