//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// Identity keys and request names share the authority's name rules
static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9.-]*[a-z0-9])?$").unwrap());

/// Payload keys look like file names (`tls.crt`, `cluster-name`)
static PAYLOAD_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap());

/// Validate an identity key or a generated request name
pub fn validate_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && NAME_REGEX.is_match(name)
}

/// Validate a request name prefix; a trailing `-` or `.` is allowed since a
/// random suffix is appended
pub fn validate_name_prefix(prefix: &str) -> bool {
    let trimmed = prefix.trim_end_matches(|c: char| c == '-' || c == '.');
    prefix.len() <= 240 && validate_name(trimmed)
}

/// Validate a key of the persisted credential payload
pub fn validate_payload_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 253 && PAYLOAD_KEY_REGEX.is_match(key)
}
