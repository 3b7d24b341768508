//! Canonicalization of Discord display names into valid local account names.
//!
//! Local account names follow wiki conventions: no markup-significant
//! characters, spaces stored as underscores, first letter uppercase, no
//! trailing underscore. `canonicalize` is deterministic for a given identity;
//! the empty-name fallback is keyed by the stable external id so it stays
//! referentially transparent.

use std::net::IpAddr;

use crate::logic::discord::ExternalIdentity;

/// Characters that can never appear in an account name.
pub const FORBIDDEN_CHARS: &[char] =
    &['#', '<', '>', '[', ']', '|', '{', '}', '%', ':', '/'];

const MAX_NAME_BYTES: usize = 255;

/// Names the account store reserves for itself.
const RESERVED_NAMES: &[&str] = &["Anonymous", "System"];

/// Why a submitted or derived name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRejection {
    Empty,
    TooLong,
    ForbiddenCharacter,
    TrailingUnderscore,
    IpShaped,
    Reserved,
}

fn is_forbidden(c: char) -> bool {
    c.is_control() || FORBIDDEN_CHARS.contains(&c)
}

/// Strip forbidden characters, collapse whitespace/underscore runs into a
/// single space, and trim edges including trailing underscores.
pub fn sanitize(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| !is_forbidden(*c)).collect();

    let mut collapsed = String::with_capacity(stripped.len());
    let mut in_run = false;
    for c in stripped.chars() {
        if c.is_whitespace() || c == '_' {
            if !in_run {
                collapsed.push(' ');
            }
            in_run = true;
        } else {
            collapsed.push(c);
            in_run = false;
        }
    }

    // First trailing-underscore strip happens here; the second runs after
    // the space-to-underscore conversion, which can reintroduce one.
    collapsed.trim().trim_end_matches(['_', ' ']).to_string()
}

fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Produce the canonical storage form of a sanitized name: first letter
/// uppercase, spaces as underscores, no trailing underscore.
pub fn to_canonical_form(sanitized: &str) -> String {
    let capitalized = capitalize_first(sanitized);
    let underscored = capitalized.replace(' ', "_");
    underscored.trim_end_matches('_').to_string()
}

fn looks_like_ip(name: &str) -> bool {
    // Spaces-as-underscores never appear in an IP; check the raw text.
    name.parse::<IpAddr>().is_ok()
}

/// Validate a canonical-form candidate against the local naming rules.
pub fn validate_account_name(name: &str) -> Result<(), NameRejection> {
    if name.is_empty() {
        return Err(NameRejection::Empty);
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(NameRejection::TooLong);
    }
    if name.chars().any(is_forbidden) {
        return Err(NameRejection::ForbiddenCharacter);
    }
    if name.ends_with('_') {
        return Err(NameRejection::TrailingUnderscore);
    }
    if looks_like_ip(name) {
        return Err(NameRejection::IpShaped);
    }
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(NameRejection::Reserved);
    }
    Ok(())
}

/// Deterministic fallback name for identities with no usable display name.
pub fn fallback_name(external_id: &str) -> String {
    format!("User{external_id}")
}

/// Map an external identity to a candidate local account name.
///
/// The result is a *candidate*: collision with an existing unrelated account
/// is checked by the flow controller before anything is committed. The
/// fallback is valid by construction, so this function is total.
pub fn canonicalize(identity: &ExternalIdentity) -> String {
    let seed = if !identity.username.is_empty() {
        identity.username.clone()
    } else {
        identity
            .global_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback_name(&identity.id))
    };

    let candidate = to_canonical_form(&sanitize(&seed));
    if validate_account_name(&candidate).is_ok() {
        return candidate;
    }

    let fallback = to_canonical_form(&sanitize(&fallback_name(&identity.id)));
    debug_assert!(
        validate_account_name(&fallback).is_ok(),
        "fallback name must always validate"
    );
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, username: &str, global_name: Option<&str>) -> ExternalIdentity {
        ExternalIdentity {
            id: id.to_string(),
            username: username.to_string(),
            global_name: global_name.map(|s| s.to_string()),
            email: None,
        }
    }

    #[test]
    fn test_forbidden_characters_are_stripped() {
        let name = canonicalize(&identity("1", "bob#0", None));
        assert_eq!(name, "Bob0");

        let name = canonicalize(&identity("2", "a<b>[c]{d}|e%f:g/h", None));
        assert_eq!(name, "Abcdefgh");
    }

    #[test]
    fn test_whitespace_and_underscores_collapse() {
        let name = canonicalize(&identity("1", "bob   the _ builder", None));
        assert_eq!(name, "Bob_the_builder");
    }

    #[test]
    fn test_trailing_underscores_removed() {
        let name = canonicalize(&identity("1", "bob___", None));
        assert_eq!(name, "Bob");
        assert!(!name.ends_with('_'));
    }

    #[test]
    fn test_first_character_capitalized() {
        assert_eq!(canonicalize(&identity("1", "alice", None)), "Alice");
        // Multi-byte first character
        assert_eq!(canonicalize(&identity("1", "ätest", None)), "Ätest");
    }

    #[test]
    fn test_empty_username_falls_back_to_global_name() {
        let name = canonicalize(&identity("1", "", Some("display name")));
        assert_eq!(name, "Display_name");
    }

    #[test]
    fn test_empty_identity_uses_deterministic_fallback() {
        let name = canonicalize(&identity("99", "", None));
        assert_eq!(name, "User99");
    }

    #[test]
    fn test_fully_sanitized_away_uses_fallback() {
        let name = canonicalize(&identity("42", "###///", None));
        assert_eq!(name, "User42");
    }

    #[test]
    fn test_canonicalize_is_deterministic() {
        let id = identity("7", "Some User_", None);
        assert_eq!(canonicalize(&id), canonicalize(&id));
    }

    #[test]
    fn test_ip_shaped_names_rejected() {
        assert_eq!(
            validate_account_name("127.0.0.1"),
            Err(NameRejection::IpShaped)
        );
        // An IP-shaped Discord username ends up at the fallback
        let name = canonicalize(&identity("5", "127.0.0.1", None));
        assert_eq!(name, "User5");
    }

    #[test]
    fn test_reserved_names_rejected() {
        assert_eq!(validate_account_name("System"), Err(NameRejection::Reserved));
        assert_eq!(
            validate_account_name("anonymous"),
            Err(NameRejection::Reserved)
        );
    }

    #[test]
    fn test_validate_rejects_trailing_underscore_and_empty() {
        assert_eq!(
            validate_account_name("Bob_"),
            Err(NameRejection::TrailingUnderscore)
        );
        assert_eq!(validate_account_name(""), Err(NameRejection::Empty));
    }
}
