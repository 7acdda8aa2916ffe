use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

/// Parse `Name: Value` into the map; malformed entries are logged and skipped.
fn add_header(headers: &mut HeaderMap, header_str: &str) {
    let Some((name, value)) = header_str.split_once(':') else {
        warn!(header = %header_str, "Invalid header format, expected 'Name: Value'");
        return;
    };
    let (name, value) = (name.trim(), value.trim());

    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        warn!(name = %name, "Invalid header name");
        return;
    };

    let Ok(header_value) = HeaderValue::from_str(value) else {
        warn!(name = %name, "Invalid header value");
        return;
    };

    debug!(name = %name, "Adding request header");
    headers.insert(header_name, header_value);
}

/// Parse a collection of header strings and return a HeaderMap
pub fn parse_headers(header_strings: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for header_str in header_strings {
        add_header(&mut headers, header_str);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "X-Device: tablet-7".to_string(),
            "Referer: http://example.com:8080/a".to_string(),
            "no colon".to_string(),
            "bad name: x".to_string(),
        ]);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-device").unwrap(), "tablet-7");
        assert_eq!(headers.get("referer").unwrap(), "http://example.com:8080/a");
    }
}
