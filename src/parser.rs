//! Stand-in for the opaque header parser: turns a raw byte block starting
//! at the request line into a [`ParsedRequest`]. Accepts `HTTP` and the
//! legacy `ICE` protocol token; tolerant of the three terminator styles
//! already stripped by the caller.

use crate::client::ParsedRequest;
use crate::error::CoreError;

/// Parse the request line and header block in `block` (terminator already
/// consumed by the caller). Returns the parsed request plus the number of
/// bytes of `block` the headers occupied, so the caller can recover any
/// trailing body bytes.
pub fn parse_request(block: &[u8]) -> Result<ParsedRequest, CoreError> {
    let text = std::str::from_utf8(block)
        .map_err(|e| CoreError::ParseFailure(format!("header block is not valid utf-8: {e}")))?;

    let mut lines = text.split("\r\n").flat_map(|l| l.split('\n'));
    let request_line = lines
        .next()
        .ok_or_else(|| CoreError::ParseFailure("empty request".into()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| CoreError::ParseFailure("missing method".into()))?
        .to_string();
    let raw_uri = parts
        .next()
        .ok_or_else(|| CoreError::ParseFailure("missing uri".into()))?;
    let version_token = parts.next().unwrap_or("HTTP/1.0");

    let (protocol, version) = split_protocol_version(version_token)?;
    let (uri, query) = match raw_uri.split_once('?') {
        Some((u, q)) => (u.to_string(), Some(q.to_string())),
        None => (raw_uri.to_string(), None),
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CoreError::ParseFailure(format!("malformed header line: {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ParsedRequest { method, uri, query, protocol, version, headers })
}

fn split_protocol_version(token: &str) -> Result<(String, String), CoreError> {
    match token.split_once('/') {
        Some((proto, ver)) => Ok((proto.to_ascii_uppercase(), ver.to_string())),
        None => Err(CoreError::ParseFailure(format!("malformed protocol token: {token:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_request() {
        let block = b"GET /stream.ogg HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test\r\n";
        let parsed = parse_request(block).unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.uri, "/stream.ogg");
        assert_eq!(parsed.protocol, "HTTP");
        assert_eq!(parsed.version, "1.1");
        assert_eq!(parsed.header("host"), Some("example.com"));
    }

    #[test]
    fn splits_query_string() {
        let block = b"GET /stream?type=.flv HTTP/1.0\r\n";
        let parsed = parse_request(block).unwrap();
        assert_eq!(parsed.uri, "/stream");
        assert_eq!(parsed.query.as_deref(), Some("type=.flv"));
    }

    #[test]
    fn accepts_icy_protocol_token() {
        let block = b"SOURCE /live ICE/1.0\r\nice-password: hunter2\r\n";
        let parsed = parse_request(block).unwrap();
        assert_eq!(parsed.protocol, "ICE");
    }

    #[test]
    fn rejects_malformed_header_line() {
        let block = b"GET / HTTP/1.0\r\nnotaheader\r\n";
        assert!(parse_request(block).is_err());
    }
}
