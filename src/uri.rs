//! Identifier codec for `rift://` URIs.
//!
//! Maps the scheme-specific identifier form to a loadable network address:
//!
//! ```text
//! rift://host[:port][/path][?query]   ──►   https://host[:port][/path][?query']
//! ```
//!
//! `query'` keeps only the *application* parameters. Keys carrying the
//! reserved `<scheme>-` prefix (e.g. `rift-height=tall`) are *namespaced*
//! presentation hints: they are stripped of the prefix, exposed on
//! [`ParsedIdentifier::namespaced_params`], and never forwarded to the address.
//!
//! The transport is `https://` unless the host is a local development host
//! and [`UriConfig::use_insecure_for_local_development`] is set.
//!
//! # Example
//!
//! ```
//! use rift::config::UriConfig;
//! use rift::uri::UriCodec;
//!
//! let codec = UriCodec::new(UriConfig::default());
//! let parsed = codec.parse("rift://app.example/swap?rift-height=tall&pair=eth").unwrap();
//! assert_eq!(parsed.host, "app.example");
//! assert_eq!(parsed.namespaced_params["height"], "tall");
//! assert_eq!(
//!     codec.to_address("rift://app.example/swap?rift-height=tall&pair=eth"),
//!     "https://app.example/swap?pair=eth"
//! );
//! ```

use std::collections::BTreeMap;

use url::form_urlencoded;

use crate::config::UriConfig;

/// Components of a parsed identifier.
///
/// Produced by [`UriCodec::parse`]. The two parameter maps partition the
/// query's key set: a key lands in exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedIdentifier {
    /// Host, including an explicit `:port` if present. Never empty.
    pub host: String,
    /// Path including its leading `/`, or empty.
    pub path: String,
    /// Raw query including the leading `?`, or empty.
    pub raw_query: String,
    /// Presentation hints, keyed without the `<scheme>-` prefix.
    pub namespaced_params: BTreeMap<String, String>,
    /// Parameters forwarded to the resolved address.
    pub application_params: BTreeMap<String, String>,
}

impl ParsedIdentifier {
    /// Re-encodes the application parameters as a query string (no `?`).
    ///
    /// Returns an empty string when there are none.
    #[must_use]
    pub fn application_query(&self) -> String {
        if self.application_params.is_empty() {
            return String::new();
        }
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.application_params.iter())
            .finish()
    }
}

/// Bidirectional mapping between identifiers and network addresses.
#[derive(Debug, Clone)]
pub struct UriCodec {
    config: UriConfig,
    /// `<scheme>://`
    prefix: String,
    /// `<scheme>-`
    param_prefix: String,
}

impl UriCodec {
    /// Create a codec for the configured scheme and local-host policy.
    #[must_use]
    pub fn new(config: UriConfig) -> Self {
        let prefix = format!("{}://", config.scheme);
        let param_prefix = format!("{}-", config.scheme);
        Self {
            config,
            prefix,
            param_prefix,
        }
    }

    /// The `<scheme>://` prefix every identifier starts with.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `true` if `input` carries this codec's scheme prefix.
    #[must_use]
    pub fn is_identifier(&self, input: &str) -> bool {
        input.starts_with(&self.prefix)
    }

    /// Parse an identifier into its components.
    ///
    /// Returns `None` if `identifier` does not start with the exact
    /// `<scheme>://` prefix or has an empty host. Never panics; malformed
    /// percent-escapes in the query decode lossily.
    #[must_use]
    pub fn parse(&self, identifier: &str) -> Option<ParsedIdentifier> {
        let rest = identifier.strip_prefix(&self.prefix)?;

        // The host ends at the first '/' or '?'. A '?' straight after the
        // host (no path separator) starts the query.
        let host_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (host, tail) = rest.split_at(host_end);
        if host.is_empty() {
            return None;
        }

        let (path, raw_query) = match tail.find('?') {
            Some(q) => tail.split_at(q),
            None => (tail, ""),
        };

        let mut namespaced_params = BTreeMap::new();
        let mut application_params = BTreeMap::new();
        let query = raw_query.strip_prefix('?').unwrap_or(raw_query);
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if let Some(hint) = key.strip_prefix(self.param_prefix.as_str()) {
                namespaced_params.insert(hint.to_string(), value.into_owned());
            } else {
                application_params.insert(key.into_owned(), value.into_owned());
            }
        }

        Some(ParsedIdentifier {
            host: host.to_string(),
            path: path.to_string(),
            raw_query: raw_query.to_string(),
            namespaced_params,
            application_params,
        })
    }

    /// Resolve an identifier to a loadable address.
    ///
    /// Input without the scheme prefix is returned unchanged, so callers may
    /// pass addresses they already resolved. Namespaced parameters are
    /// dropped; application parameters are re-encoded (order may change).
    #[must_use]
    pub fn to_address(&self, identifier: &str) -> String {
        match self.parse(identifier) {
            Some(parsed) => self.address_of(&parsed),
            None => {
                if self.is_identifier(identifier) {
                    log::warn!("Identifier has no host, passing through: {identifier}");
                }
                identifier.to_string()
            }
        }
    }

    /// Build the address for an already-parsed identifier.
    #[must_use]
    pub fn address_of(&self, parsed: &ParsedIdentifier) -> String {
        let mut address = format!("{}{}{}", self.protocol_for(&parsed.host), parsed.host, parsed.path);
        let query = parsed.application_query();
        if !query.is_empty() {
            address.push('?');
            address.push_str(&query);
        }
        address
    }

    /// Transport prefix for `host` under the local-development policy.
    #[must_use]
    pub fn protocol_for(&self, host: &str) -> &'static str {
        if self.config.use_insecure_for_local_development && self.is_local_host(host) {
            "http://"
        } else {
            "https://"
        }
    }

    /// Returns `true` if `host` is a local development host.
    ///
    /// Matches the allow-list case-insensitively, or any host ending with
    /// the local TLD suffix. An explicit `:port` is ignored.
    #[must_use]
    pub fn is_local_host(&self, host: &str) -> bool {
        let name = strip_port(host).to_ascii_lowercase();
        if self
            .config
            .local_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&name))
        {
            return true;
        }
        let tld = self.config.local_tld.to_ascii_lowercase();
        !tld.is_empty() && name.ends_with(&tld)
    }
}

impl Default for UriCodec {
    fn default() -> Self {
        Self::new(UriConfig::default())
    }
}

/// `host:8080` -> `host`; anything else is returned as-is.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insecure_codec() -> UriCodec {
        UriCodec::new(UriConfig {
            use_insecure_for_local_development: true,
            ..UriConfig::default()
        })
    }

    #[test]
    fn test_parse_full_identifier() {
        let codec = UriCodec::default();
        let parsed = codec
            .parse("rift://host/path?rift-height=tall&x=1")
            .unwrap();

        assert_eq!(parsed.host, "host");
        assert_eq!(parsed.path, "/path");
        assert_eq!(parsed.raw_query, "?rift-height=tall&x=1");
        assert_eq!(parsed.namespaced_params.len(), 1);
        assert_eq!(parsed.namespaced_params["height"], "tall");
        assert_eq!(parsed.application_params.len(), 1);
        assert_eq!(parsed.application_params["x"], "1");
    }

    #[test]
    fn test_namespaced_param_stripped_from_address() {
        let codec = UriCodec::default();
        assert_eq!(
            codec.to_address("rift://host/path?rift-height=tall&x=1"),
            "https://host/path?x=1"
        );
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let codec = UriCodec::default();
        assert!(codec.parse("not-a-rift-uri").is_none());
        assert!(codec.parse("https://host/path").is_none());
        assert!(codec.parse("rift:/host").is_none());
        assert!(codec.parse("RIFT://host").is_none());
    }

    #[test]
    fn test_to_address_passes_through_non_identifiers() {
        let codec = UriCodec::default();
        assert_eq!(codec.to_address("not-a-rift-uri"), "not-a-rift-uri");
        assert_eq!(
            codec.to_address("https://already.resolved/x?y=1"),
            "https://already.resolved/x?y=1"
        );
    }

    #[test]
    fn test_parse_host_only() {
        let codec = UriCodec::default();
        let parsed = codec.parse("rift://example.com").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.raw_query, "");
        assert!(parsed.application_params.is_empty());
        assert_eq!(codec.to_address("rift://example.com"), "https://example.com");
    }

    #[test]
    fn test_parse_query_directly_after_host() {
        let codec = UriCodec::default();
        let parsed = codec.parse("rift://example.com?a=1&rift-color=ff0000").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.raw_query, "?a=1&rift-color=ff0000");
        assert_eq!(parsed.application_params["a"], "1");
        assert_eq!(parsed.namespaced_params["color"], "ff0000");
        assert_eq!(
            codec.to_address("rift://example.com?a=1&rift-color=ff0000"),
            "https://example.com?a=1"
        );
    }

    #[test]
    fn test_parse_slash_inside_query_without_path() {
        // A '/' after the '?' belongs to the query, not the path.
        let codec = UriCodec::default();
        let parsed = codec.parse("rift://host?next=/home").unwrap();
        assert_eq!(parsed.host, "host");
        assert_eq!(parsed.path, "");
        assert_eq!(parsed.raw_query, "?next=/home");
        assert_eq!(parsed.application_params["next"], "/home");
        assert_eq!(
            codec.to_address("rift://host?next=/home"),
            "https://host?next=%2Fhome"
        );
    }

    #[test]
    fn test_parse_empty_host_fails() {
        let codec = UriCodec::default();
        assert!(codec.parse("rift://").is_none());
        assert!(codec.parse("rift:///path").is_none());
        assert_eq!(codec.to_address("rift:///path"), "rift:///path");
    }

    #[test]
    fn test_params_partition_keys() {
        let codec = UriCodec::default();
        let parsed = codec
            .parse("rift://h/p?a=1&rift-height=compact&b=2&rift-color=00ff00")
            .unwrap();
        for key in parsed.namespaced_params.keys() {
            assert!(!parsed.application_params.contains_key(key));
        }
        assert_eq!(parsed.namespaced_params.len() + parsed.application_params.len(), 4);
    }

    #[test]
    fn test_reencoding_preserves_application_pairs() {
        let codec = UriCodec::default();
        let address = codec.to_address("rift://h/p?zeta=last&alpha=first&rift-height=tall");
        let reparsed = url::Url::parse(&address).unwrap();
        let pairs: BTreeMap<String, String> = reparsed.query_pairs().into_owned().collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["zeta"], "last");
        assert_eq!(pairs["alpha"], "first");
    }

    #[test]
    fn test_percent_decoding() {
        let codec = UriCodec::default();
        let parsed = codec.parse("rift://h/p?msg=hello%20world&plus=a+b").unwrap();
        assert_eq!(parsed.application_params["msg"], "hello world");
        assert_eq!(parsed.application_params["plus"], "a b");
    }

    #[test]
    fn test_malformed_percent_encoding_does_not_panic() {
        let codec = UriCodec::default();
        let parsed = codec.parse("rift://h/p?bad=%zz&worse=%").unwrap();
        assert_eq!(parsed.application_params["bad"], "%zz");
        assert_eq!(parsed.application_params["worse"], "%");
        let _ = codec.to_address("rift://h/p?bad=%E0%A4%A");
    }

    #[test]
    fn test_is_local_host() {
        let codec = UriCodec::default();
        assert!(codec.is_local_host("foo.local"));
        assert!(!codec.is_local_host("example.com"));
        assert!(codec.is_local_host("LOCALHOST"));
        assert!(codec.is_local_host("127.0.0.1"));
        assert!(codec.is_local_host("localhost:3000"));
        assert!(codec.is_local_host("Printer.LOCAL"));
        assert!(!codec.is_local_host("local"));
    }

    #[test]
    fn test_local_hosts_secure_by_default() {
        let codec = UriCodec::default();
        assert_eq!(codec.to_address("rift://localhost:3000/app"), "https://localhost:3000/app");
    }

    #[test]
    fn test_insecure_for_local_development() {
        let codec = insecure_codec();
        assert_eq!(codec.to_address("rift://localhost:3000/app"), "http://localhost:3000/app");
        assert_eq!(codec.to_address("rift://box.local"), "http://box.local");
        assert_eq!(codec.to_address("rift://example.com/app"), "https://example.com/app");
    }

    #[test]
    fn test_custom_local_hosts_and_scheme() {
        let codec = UriCodec::new(UriConfig {
            scheme: "demo".to_string(),
            use_insecure_for_local_development: true,
            local_hosts: vec!["dev.internal".to_string()],
            local_tld: ".test".to_string(),
        });
        assert!(codec.parse("rift://dev.internal").is_none());
        assert_eq!(
            codec.to_address("demo://dev.internal/x?demo-height=tall&rift-height=tall"),
            "http://dev.internal/x?rift-height=tall"
        );
        assert!(codec.is_local_host("api.test"));
        assert!(!codec.is_local_host("localhost"));
    }
}
