//! Hand-rolled raw-query parsing, since `axum::extract::Query` collapses
//! repeated keys (needed for `?name=a&name=b` in `/uuids` and `/names`).

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// All `key=value` pairs in a raw query string, percent-decoded.
pub fn parse_all(raw_query: &str) -> Vec<(String, String)> {
    raw_query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(k), percent_decode(v)))
        })
        .collect()
}

/// All values for `key` in a raw query string, in order.
pub fn values(raw_query: &str, key: &str) -> Vec<String> {
    parse_all(raw_query)
        .into_iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v)
        .collect()
}

/// The first value for `key`, if present.
pub fn first(raw_query: &str, key: &str) -> Option<String> {
    values(raw_query, key).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_collect_in_order() {
        let v = values("name=a&name=b&other=c", "name");
        assert_eq!(v, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn percent_and_plus_decode() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
    }
}
