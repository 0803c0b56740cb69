// src/http1/parser.rs
use memchr::{memchr, memchr2};

use crate::http1::types::{Method, Request, Version, MAX_HEADERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Incomplete,
    InvalidFormat,
    TooLarge,
}

/// Parses one HTTP/1 request out of `buf_mut`. Returns the parsed
/// `Request` and the number of bytes consumed (request line + headers +
/// body). Re-invoked with a growing buffer as more bytes arrive on the
/// connection — each call rescans from the start, which is what makes
/// the parser trivially resumable without its own saved state: `reset()`
/// for the next request on the same connection is just "advance the
/// read buffer past `consumed` and call again."
pub fn parse_request(buf_mut: &mut [u8]) -> Result<(Request<'_>, usize), ParseError> {
    let ptr = buf_mut.as_mut_ptr();
    let len = buf_mut.len();
    let buf = &*buf_mut;

    let space1 = memchr(b' ', buf).ok_or(ParseError::Incomplete)?;
    let method = Method::from_bytes(&buf[..space1]);

    let space2 = space1 + 1 + memchr(b' ', &buf[space1 + 1..]).ok_or(ParseError::Incomplete)?;
    let url_bytes = &buf[space1 + 1..space2];
    let url = std::str::from_utf8(url_bytes).map_err(|_| ParseError::InvalidFormat)?;

    let (path_and_query, fragment) = match url.find('#') {
        Some(idx) => (&url[..idx], Some(&url[idx + 1..])),
        None => (url, None),
    };
    let (path, query) = match path_and_query.find('?') {
        Some(idx) => (&path_and_query[..idx], Some(&path_and_query[idx + 1..])),
        None => (path_and_query, None),
    };

    let req_line_end = space2 + 1 + memchr::memmem::find(&buf[space2 + 1..], b"\r\n").ok_or(ParseError::Incomplete)?;

    let version_bytes = &buf[space2 + 1..req_line_end];
    let version = match version_bytes {
        b"HTTP/1.1" => Version::Http11,
        b"HTTP/1.0" => Version::Http10,
        _ => return Err(ParseError::InvalidFormat),
    };

    let mut headers = [("", ""); MAX_HEADERS];
    let mut header_count: u8 = 0;
    let mut cursor = req_line_end + 2;

    while cursor + 1 < buf.len() {
        if buf[cursor] == b'\r' && buf[cursor + 1] == b'\n' {
            cursor += 2;
            break;
        }

        if header_count as usize >= MAX_HEADERS {
            return Err(ParseError::TooLarge);
        }

        let colon_idx = cursor + memchr2(b':', b'\r', &buf[cursor..]).ok_or(ParseError::InvalidFormat)?;
        if buf[colon_idx] == b'\r' {
            return Err(ParseError::InvalidFormat);
        }

        let name = std::str::from_utf8(&buf[cursor..colon_idx]).map_err(|_| ParseError::InvalidFormat)?;

        let line_end =
            colon_idx + 1 + memchr::memmem::find(&buf[colon_idx + 1..], b"\r\n").ok_or(ParseError::Incomplete)?;

        let mut val_start = colon_idx + 1;
        while val_start < line_end && buf[val_start] == b' ' {
            val_start += 1;
        }

        let val = std::str::from_utf8(&buf[val_start..line_end]).map_err(|_| ParseError::InvalidFormat)?;

        headers[header_count as usize] = (name, val);
        header_count += 1;
        cursor = line_end + 2;
    }

    let header_end = cursor;

    // SAFETY: the immutable `name`/`val` slices taken above all lie in
    // buf[..header_end]; the mutable slice below only ever touches
    // buf[header_end..], so the two views never alias.
    let remaining = unsafe { std::slice::from_raw_parts_mut(ptr.add(header_end), len - header_end) };

    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut connection_tokens: Option<&str> = None;
    let mut upgrade_protocol: Option<&str> = None;

    for header in headers.iter().take(header_count as usize) {
        let (name, val) = *header;
        if name.eq_ignore_ascii_case("content-length") {
            content_length = val.trim().parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding") && val.trim().eq_ignore_ascii_case("chunked") {
            chunked = true;
        } else if name.eq_ignore_ascii_case("connection") {
            connection_tokens = Some(val);
        } else if name.eq_ignore_ascii_case("upgrade") {
            upgrade_protocol = Some(val);
        }
    }

    // Chunked wins over Content-Length per the resolution rule.
    if chunked {
        content_length = None;
    }

    let has_token = |tokens: &str, target: &str| tokens.split(',').any(|t| t.trim().eq_ignore_ascii_case(target));

    let keep_alive = match connection_tokens {
        Some(tokens) if has_token(tokens, "close") => false,
        Some(tokens) if has_token(tokens, "keep-alive") => true,
        Some(_) => matches!(version, Version::Http11),
        None => matches!(version, Version::Http11),
    };

    let upgrade = connection_tokens.map(|t| has_token(t, "upgrade")).unwrap_or(false) && upgrade_protocol.is_some();

    let consumed;
    let final_body: &[u8];

    if chunked {
        let mut read_pos = 0;
        let mut write_pos = 0;

        loop {
            let crlf =
                read_pos + memchr::memmem::find(&remaining[read_pos..], b"\r\n").ok_or(ParseError::Incomplete)?;

            let hex_str = std::str::from_utf8(&remaining[read_pos..crlf]).map_err(|_| ParseError::InvalidFormat)?;
            let chunk_len = usize::from_str_radix(hex_str.trim(), 16).map_err(|_| ParseError::InvalidFormat)?;

            if chunk_len == 0 {
                read_pos = crlf + 2;
                if read_pos + 2 > remaining.len() {
                    return Err(ParseError::Incomplete);
                }
                if remaining[read_pos] == b'\r' && remaining[read_pos + 1] == b'\n' {
                    read_pos += 2;
                }
                break;
            }

            let data_start = crlf + 2;
            if data_start + chunk_len + 2 > remaining.len() {
                return Err(ParseError::Incomplete);
            }

            remaining.copy_within(data_start..data_start + chunk_len, write_pos);
            write_pos += chunk_len;
            read_pos = data_start + chunk_len + 2;
        }

        let body_ptr = remaining.as_ptr();
        final_body = unsafe { std::slice::from_raw_parts(body_ptr, write_pos) };
        consumed = header_end + read_pos;
    } else {
        let expected_len = content_length.unwrap_or(0) as usize;
        if remaining.len() < expected_len {
            return Err(ParseError::Incomplete);
        }
        let body_ptr = remaining.as_ptr();
        final_body = unsafe { std::slice::from_raw_parts(body_ptr, expected_len) };
        consumed = header_end + expected_len;
    }

    Ok((
        Request {
            method,
            version,
            url,
            path,
            query,
            fragment,
            headers,
            header_count,
            body: final_body,
            content_length,
            chunked,
            keep_alive,
            upgrade,
            upgrade_protocol,
        },
        consumed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http1::types::Method;

    #[test]
    fn parses_basic_request() {
        let mut req = b"GET /some/path?foo=bar#sec HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nBodyContent".to_vec();
        let (request, consumed) = parse_request(&mut req).unwrap();

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/some/path");
        assert_eq!(request.query, Some("foo=bar"));
        assert_eq!(request.fragment, Some("sec"));
        assert_eq!(request.header_count, 2);
        assert_eq!(request.body, b"BodyContent");
        assert_eq!(request.keep_alive, true);
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn incomplete_request_line() {
        let mut req = b"GET /some/path?foo=bar HTT".to_vec();
        assert!(matches!(parse_request(&mut req), Err(ParseError::Incomplete)));
    }

    #[test]
    fn chunked_body_decodes_in_place() {
        let mut req = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n".to_vec();
        let (request, _consumed) = parse_request(&mut req).unwrap();
        assert_eq!(request.body, b"Wikipedia in\r\n\r\nchunks.");
        assert!(request.chunked);
        assert!(request.content_length.is_none());
    }

    #[test]
    fn http10_defaults_to_close() {
        let mut req = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        let (request, _) = parse_request(&mut req).unwrap();
        assert_eq!(request.keep_alive, false);
    }

    #[test]
    fn connection_keep_alive_overrides_http10() {
        let mut req = b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n".to_vec();
        let (request, _) = parse_request(&mut req).unwrap();
        assert_eq!(request.keep_alive, true);
    }

    #[test]
    fn upgrade_is_detected() {
        let mut req = b"GET / HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n".to_vec();
        let (request, _) = parse_request(&mut req).unwrap();
        assert!(request.upgrade);
        assert_eq!(request.upgrade_protocol, Some("h2c"));
    }

    #[test]
    fn header_cap_rejects_excess() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..101 {
            raw.push_str(&format!("X-H{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        let mut req = raw.into_bytes();
        assert!(matches!(parse_request(&mut req), Err(ParseError::TooLarge)));
    }
}
