//! HPACK static table (RFC 7541 Appendix A). Indices are 1-based per the
//! spec; index 0 is never valid.

pub const SIZE: usize = 61;

pub const STATIC_TABLE: [(&str, &str); SIZE] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Returns `(name, value)` for 1-based `index`, or `None` if out of
/// range for the static table (callers fall through to the dynamic
/// table for indices beyond `SIZE`).
pub fn get(index: usize) -> Option<(&'static str, &'static str)> {
    if index == 0 || index > SIZE {
        return None;
    }
    Some(STATIC_TABLE[index - 1])
}

/// Finds the lowest static index matching `name` (and `value` if given),
/// for the encoder's indexing decision.
pub fn find(name: &str, value: Option<&str>) -> Option<usize> {
    STATIC_TABLE.iter().position(|(n, v)| {
        *n == name && value.map(|val| *v == val).unwrap_or(true)
    }).map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_one_is_authority() {
        assert_eq!(get(1), Some((":authority", "")));
    }

    #[test]
    fn index_zero_and_overflow_are_none() {
        assert_eq!(get(0), None);
        assert_eq!(get(62), None);
    }

    #[test]
    fn find_prefers_exact_value_match() {
        assert_eq!(find(":method", Some("POST")), Some(3));
        assert_eq!(find(":method", None), Some(2));
    }
}
