//! Responses and header lists.

use bytes::Bytes;

/// Ordered header list with case-insensitive lookup.
///
/// Order and duplicates are preserved exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Append a header, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any comma-separated element of `name` equals `token`.
    ///
    /// `Connection: keep-alive, Close` has the token `close`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Append every entry of `other`.
    pub fn extend(&mut self, other: &HeaderList) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append to the value of the last header (obsolete line folding).
    pub(crate) fn continue_last(&mut self, more: &str) -> bool {
        match self.entries.last_mut() {
            Some((_, value)) => {
                value.push(' ');
                value.push_str(more);
                true
            }
            None => false,
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    status: u16,
    headers: HeaderList,
    body: Bytes,
    should_close: bool,
}

impl RawResponse {
    pub fn new(status: u16, headers: HeaderList, body: Bytes, should_close: bool) -> Self {
        Self {
            status,
            headers,
            body,
            should_close,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The connection that carried this response must not be reused.
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `Retry-After` in seconds. HTTP-date values are not interpreted.
    pub fn retry_after(&self) -> Option<f64> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite())
    }

    /// Whether the body is an HTML page rather than an API payload.
    pub fn looks_like_html(&self) -> bool {
        if self
            .header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        {
            return true;
        }
        let head = &self.body[..self.body.len().min(512)];
        let head = String::from_utf8_lossy(head).to_ascii_lowercase();
        let head = head.trim_start();
        head.starts_with("<!doctype html") || head.starts_with("<html")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let headers: HeaderList = [("Content-Type", "application/json"), ("X-Id", "1")]
            .into_iter()
            .collect();

        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("X-ID"), Some("1"));
        assert!(!headers.contains("retry-after"));
    }

    #[test]
    fn test_header_order_and_duplicates_preserved() {
        let mut headers = HeaderList::new();
        headers.push("Set-Cookie", "a=1");
        headers.push("Vary", "Accept");
        headers.push("set-cookie", "b=2");

        assert_eq!(headers.get_all("SET-COOKIE").collect::<Vec<_>>(), ["a=1", "b=2"]);
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Set-Cookie", "Vary", "set-cookie"]);
    }

    #[test]
    fn test_has_token() {
        let headers = HeaderList::new().with("Connection", "keep-alive, Close");
        assert!(headers.has_token("connection", "close"));
        assert!(headers.has_token("connection", "keep-alive"));
        assert!(!headers.has_token("connection", "upgrade"));
    }

    #[test]
    fn test_retry_after() {
        let response = RawResponse::new(
            429,
            HeaderList::new().with("Retry-After", " 5 "),
            Bytes::new(),
            false,
        );
        assert_eq!(response.retry_after(), Some(5.0));

        let response = RawResponse::new(
            429,
            HeaderList::new().with("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT"),
            Bytes::new(),
            false,
        );
        assert_eq!(response.retry_after(), None);
    }

    #[test]
    fn test_looks_like_html() {
        let by_header = RawResponse::new(
            400,
            HeaderList::new().with("Content-Type", "text/html; charset=UTF-8"),
            Bytes::from_static(b"Bad Request"),
            true,
        );
        assert!(by_header.looks_like_html());

        let by_body = RawResponse::new(
            400,
            HeaderList::new(),
            Bytes::from_static(b"\n  <!DOCTYPE html><html><body>400</body></html>"),
            true,
        );
        assert!(by_body.looks_like_html());

        let json = RawResponse::new(
            400,
            HeaderList::new().with("Content-Type", "application/json"),
            Bytes::from_static(b"{\"err\":\"Invalid node id\"}"),
            false,
        );
        assert!(!json.looks_like_html());
    }
}
