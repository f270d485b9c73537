//! Canonical name validation.
//!
//! Every entity name in QID is slug-shaped: `[a-z0-9]+(-[a-z0-9]+)*`, at
//! most 255 bytes. Resources are addressed by a dotted canonical,
//! `type.name`, where each half is a slug.

/// Returns true if `s` is a valid slug name.
pub fn is_valid_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 255 {
        return false;
    }
    if s.starts_with('-') || s.ends_with('-') || s.contains("--") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Returns true if `rc` is a valid resource canonical (`type.name`).
///
/// The canonical is split once on `.`; both halves must be valid slugs.
pub fn is_valid_resource_canonical(rc: &str) -> bool {
    match rc.split_once('.') {
        Some((rt, rn)) => is_valid_name(rt) && is_valid_name(rn),
        None => false,
    }
}

/// Builds the canonical identifier of a resource from its type and name.
pub fn resource_canonical(rt: &str, rn: &str) -> String {
    format!("{}.{}", rt, rn)
}
