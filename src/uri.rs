use http::uri::PathAndQuery;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::Error;

/// Everything outside the RFC 3986 unreserved set.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Assembles a request target from a relative path and query pairs.
///
/// The path, and any query it already carries, is taken as already escaped.
/// Keys and values are percent-encoded and appended in the order supplied.
#[derive(Debug, Clone, Default)]
pub struct UriBuilder {
    path: String,
    query: Vec<(String, String)>,
}

impl UriBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        UriBuilder {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn append_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn build(&self) -> Result<PathAndQuery, Error> {
        if self.path.contains('#') {
            return Err(Error::Encoding {
                input: self.path.clone(),
                reason: "request target must not carry a fragment".to_string(),
            });
        }

        // A query already in the path is kept verbatim and extended.
        let (path, mut query) = match self.path.split_once('?') {
            Some((path, query)) => (path, query.to_string()),
            None => (self.path.as_str(), String::new()),
        };
        for (key, value) in &self.query {
            if !query.is_empty() && !query.ends_with('&') {
                query.push('&');
            }
            query.extend(utf8_percent_encode(key, QUERY_COMPONENT));
            query.push('=');
            query.extend(utf8_percent_encode(value, QUERY_COMPONENT));
        }

        let mut target = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        if !query.is_empty() {
            target.push('?');
            target.push_str(&query);
        }

        PathAndQuery::try_from(target.as_str()).map_err(|err| Error::Encoding {
            input: self.path.clone(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_query(built: &PathAndQuery) -> Vec<(String, String)> {
        form_urlencoded::parse(built.query().unwrap_or("").as_bytes())
            .into_owned()
            .collect()
    }

    #[test_case("/search", &[("q", "Bit Titan")] => "/search?q=Bit%20Titan"; "space is percent encoded")]
    #[test_case("/search", &[("q", "a&b")] => "/search?q=a%26b"; "ampersand is not a separator")]
    #[test_case("/search", &[("q", "BitTitan")] => "/search?q=BitTitan"; "plain value")]
    #[test_case("/search", &[] => "/search"; "no parameters")]
    #[test_case("search", &[("a", "1")] => "/search?a=1"; "leading slash added")]
    #[test_case("", &[("a", "1")] => "/?a=1"; "empty path")]
    #[test_case("/s", &[("b", "2"), ("a", "1"), ("b", "3")] => "/s?b=2&a=1&b=3"; "order kept without dedup")]
    #[test_case("/s", &[("k=y", "1+1")] => "/s?k%3Dy=1%2B1"; "key escaped too")]
    #[test_case("/s", &[("q", "-._~")] => "/s?q=-._~"; "unreserved stay raw")]
    #[test_case("/s", &[("q", "é")] => "/s?q=%C3%A9"; "utf8 bytes")]
    #[test_case("/a%20b/c", &[] => "/a%20b/c"; "escaped path kept")]
    #[test_case("/search?x=1", &[("q", "Bit Titan")] => "/search?x=1&q=Bit%20Titan"; "existing query extended")]
    #[test_case("/search?", &[("q", "a")] => "/search?q=a"; "empty existing query")]
    #[test_case("/search?x=1&", &[("q", "a")] => "/search?x=1&q=a"; "trailing separator reused")]
    #[test_case("/search?x=1", &[] => "/search?x=1"; "existing query alone")]
    fn build_uri(path: &str, query: &[(&str, &str)]) -> String {
        query
            .iter()
            .fold(UriBuilder::new(path), |builder, (k, v)| builder.append_query(*k, *v))
            .build()
            .unwrap()
            .to_string()
    }

    #[test_case(&[("q", "Bit Titan")]; "single")]
    #[test_case(&[("z", "1"), ("a", "2"), ("z", "3")]; "unsorted duplicates")]
    #[test_case(&[("k&=", "v=&"), ("+", "%"), ("", "")]; "separators and empties")]
    #[test_case(&[("emoji", "🦀 crab"), ("path", "/a/b?c#d")]; "non ascii and delimiters")]
    fn query_round_trips(pairs: &[(&str, &str)]) {
        let built = pairs
            .iter()
            .fold(UriBuilder::new("/r"), |builder, (k, v)| builder.append_query(*k, *v))
            .build()
            .unwrap();

        let expected: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(decode_query(&built), expected);
    }

    #[test]
    fn reserved_characters_never_appear_raw() {
        for c in ":/?#[]@!$&'()*+,;=% ".chars() {
            let built = UriBuilder::new("/r")
                .append_query("v", c.to_string())
                .build()
                .unwrap();
            let value = built.query().unwrap().strip_prefix("v=").unwrap();
            assert!(!value.contains(c) || c == '%', "raw {c:?} in {value}");
            assert_eq!(value, format!("%{:02X}", c as u32));
        }
    }

    #[test_case("/a#b"; "fragment in path")]
    #[test_case("/a?b#c"; "fragment after query")]
    #[test_case("/a b"; "space in path")]
    fn invalid_path_is_encoding_error(path: &str) {
        let err = UriBuilder::new(path).append_query("q", "x").build().unwrap_err();
        assert!(matches!(err, Error::Encoding { ref input, .. } if input == path));
    }
}
