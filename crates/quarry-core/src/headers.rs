//! Ordered header container shared by requests and responses.

/// An ordered multimap of `(name, value)` pairs.  Duplicate names are
/// kept in arrival order; lookups return the last match so that later
/// headers override earlier ones, mirroring wire semantics.
///
/// Threading: not thread-safe.  Becomes shared-read (via `Arc`) once
/// attached to a submitted request.
#[derive(Clone, Debug, Default)]
pub struct HeaderList {
    headers: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> HeaderList {
        HeaderList::default()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Append a pair as given; no normalization is applied.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Append a raw header line, splitting on the first `:`.  The name
    /// is lower-cased and trimmed, the value left-trimmed.  Degenerate
    /// input is accepted: empty names and values are stored, and a line
    /// without a colon is kept as a name with an empty value.
    pub fn append_normal(&mut self, raw: &str) {
        match raw.split_once(':') {
            Some((name, value)) => {
                self.headers.push((
                    name.trim().to_ascii_lowercase(),
                    value.trim_start().to_string(),
                ));
            }
            None => {
                self.headers.push((raw.trim_start().to_string(), String::new()));
            }
        }
    }

    /// Case-insensitive lookup; the last matching value wins.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_find_last_wins() {
        let mut headers = HeaderList::new();
        headers.append("X-One", "first");
        headers.append("x-one", "second");
        headers.append("Other", "value");
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.find("X-ONE"), Some("second"));
        assert_eq!(headers.find("other"), Some("value"));
        assert_eq!(headers.find("missing"), None);
    }

    #[test]
    fn append_normal_splits_and_normalizes() {
        let mut headers = HeaderList::new();
        headers.append_normal("Content-Type:  text/html ");
        assert_eq!(headers.find("content-type"), Some("text/html "));

        headers.append_normal("X-Empty:");
        assert_eq!(headers.find("x-empty"), Some(""));

        // Colon-free lines are stored as a bare name.
        headers.append_normal("malformed line");
        assert_eq!(headers.find("malformed line"), Some(""));

        // Empty name before the colon is permitted.
        headers.append_normal(": naked value");
        assert_eq!(headers.find(""), Some("naked value"));
    }

    #[test]
    fn iteration_preserves_order() {
        let mut headers = HeaderList::new();
        headers.append("a", "1");
        headers.append("b", "2");
        headers.append("a", "3");
        let seen: Vec<_> = headers.iter().collect();
        assert_eq!(seen, vec![("a", "1"), ("b", "2"), ("a", "3")]);
    }
}
