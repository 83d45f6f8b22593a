//! Utility functions and helpers

pub mod certificates;
pub mod duration;

pub use certificates::{validate_key_pair_pem, KeyPairSummary};
pub use duration::{parse_duration, proto_duration, Timeout};

use regex::Regex;

/// RFC 1123 DNS name, optionally with a single leading wildcard label.
pub static HOSTNAME_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^(\*\.)?[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .unwrap()
});

/// HTTP header field name token.
pub static HEADER_NAME_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").unwrap());

/// Check a virtual host name.
pub fn is_valid_hostname(hostname: &str) -> bool {
    hostname.len() <= 253 && HOSTNAME_REGEX.is_match(hostname)
}

/// Check an HTTP header name.
pub fn is_valid_header_name(name: &str) -> bool {
    HEADER_NAME_REGEX.is_match(name)
}
