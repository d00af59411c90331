//! Identifier matching within free text.

use regex::Regex;

/// One match: byte range plus matched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// The matched identifier.
    pub text: String,
}

/// Compiled identifier pattern for one scheme.
///
/// Shape: `<scheme>://host[:port][/path][?query]` where the host starts and
/// ends alphanumeric (interior `-`/`.` allowed), the path stops at
/// whitespace, angle brackets and `?`, and the query runs to the next
/// whitespace.
#[derive(Debug, Clone)]
pub struct IdentifierPattern {
    token: String,
    regex: Regex,
}

impl IdentifierPattern {
    /// Compile the pattern for `scheme`.
    ///
    /// # Errors
    ///
    /// Only if the resulting expression fails to compile.
    pub fn new(scheme: &str) -> Result<Self, regex::Error> {
        let token = format!("{scheme}://");
        let regex = Regex::new(&format!(
            r"{}[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?(?:/[^\s<>?]*)?(?:\?\S*)?",
            regex::escape(&token)
        ))?;
        Ok(Self { token, regex })
    }

    /// The bare `<scheme>://` token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Every non-overlapping match in `text`, left to right.
    #[must_use]
    pub fn find_all(&self, text: &str) -> Vec<Found> {
        // Most text never mentions the scheme.
        if !text.contains(self.token.as_str()) {
            return Vec::new();
        }
        self.regex
            .find_iter(text)
            .map(|m| Found {
                start: m.start(),
                end: m.end(),
                text: m.as_str().to_string(),
            })
            .collect()
    }
}
