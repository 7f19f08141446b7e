//! Key policy: key generation and ownership checks.
//!
//! Pure functions, no I/O. The leading `<owner_id>/` segment of a key is the
//! sole authorization boundary: two owners can never contend on the same key
//! by construction, so the gateway needs no per-key locking.

use crate::models::principal::Principal;
use chrono::Utc;
use rand::Rng;

const MAX_KEY_LEN: usize = 1024;
const MAX_FILE_NAME_LEN: usize = 120;
const SUFFIX_TOKEN_LEN: usize = 8;

/// Reduce a client-supplied file name to a restricted character set.
///
/// Letters, digits, `.`, `_`, and `-` pass through; everything else becomes
/// `_`. The result is truncated so the final key stays well under the key
/// length bound. An empty or all-invalid name degrades to `"file"`.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(MAX_FILE_NAME_LEN);
    if out.trim_matches('_').is_empty() {
        return "file".to_string();
    }
    out
}

/// Build a new object key from injected time and random inputs.
///
/// Shape: `<owner_id>/<millis>-<token>-<sanitized-name>`. Deterministic given
/// its inputs, which is what makes it unit-testable; production callers use
/// [`new_key`].
pub fn new_key_with(owner_id: &str, original_name: &str, now_millis: i64, token: &str) -> String {
    format!(
        "{}/{}-{}-{}",
        owner_id,
        now_millis,
        token,
        sanitize_file_name(original_name)
    )
}

/// Generate a collision-resistant key for a fresh upload.
pub fn new_key(owner_id: &str, original_name: &str) -> String {
    let mut rng = rand::rng();
    let token: String = (0..SUFFIX_TOKEN_LEN)
        .map(|_| {
            let n = rng.random_range(0..36u32);
            char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    new_key_with(owner_id, original_name, Utc::now().timestamp_millis(), &token)
}

/// May `principal` read or delete the object at `key`?
///
/// True iff the key carries the principal's ownership prefix, or the
/// principal is the configured administrator. This single predicate gates
/// both stream and delete.
pub fn may_access(principal: &Principal, key: &str, admin_email: &str) -> bool {
    key.starts_with(&format!("{}/", principal.id)) || principal.is_admin(admin_email)
}

/// May `principal` create a record at `key`?
///
/// Stricter than [`may_access`]: the ownership prefix must equal the
/// principal's id exactly. Admins cannot create under another owner's
/// prefix through this path.
pub fn may_create(principal: &Principal, key: &str) -> bool {
    key.starts_with(&format!("{}/", principal.id))
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or overlong keys, leading `/`, `..` segments, backslashes,
/// and control characters. Keys the gateway generates always pass; this
/// guards the ones arriving in request paths.
pub fn ensure_key_safe(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("key is empty".into());
    }
    if key.len() > MAX_KEY_LEN {
        return Err("key too long".into());
    }
    if key.starts_with('/') || key.contains("..") {
        return Err("key contains path traversal".into());
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err("key contains forbidden characters".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str, email: &str) -> Principal {
        Principal {
            id: id.into(),
            email: email.into(),
        }
    }

    #[test]
    fn sanitizer_replaces_disallowed_chars() {
        assert_eq!(sanitize_file_name("photo (1).png"), "photo__1_.png");
        assert_eq!(sanitize_file_name("über maß.jpg"), "_ber_ma_.jpg");
        assert_eq!(sanitize_file_name("ok-name_2.mp4"), "ok-name_2.mp4");
    }

    #[test]
    fn sanitizer_degrades_empty_names() {
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("§§§"), "file");
    }

    #[test]
    fn sanitizer_truncates_long_names() {
        let long = "a".repeat(500);
        assert!(sanitize_file_name(&long).len() <= MAX_FILE_NAME_LEN);
    }

    #[test]
    fn key_is_deterministic_given_inputs() {
        let key = new_key_with("u1", "photo.png", 1_700_000_000_000, "abc12345");
        assert_eq!(key, "u1/1700000000000-abc12345-photo.png");
    }

    #[test]
    fn generated_keys_carry_ownership_prefix() {
        let key = new_key("u1", "photo.png");
        assert!(key.starts_with("u1/"));
        ensure_key_safe(&key).unwrap();
    }

    #[test]
    fn owner_may_access_own_keys_only() {
        let a = principal("u1", "a@example.com");
        assert!(may_access(&a, "u1/123-x-photo.png", "admin@example.com"));
        assert!(!may_access(&a, "u2/123-x-photo.png", "admin@example.com"));
    }

    #[test]
    fn admin_may_access_any_key_but_not_create() {
        let admin = principal("adm", "Admin@Example.com");
        assert!(may_access(&admin, "u2/123-x-photo.png", "admin@example.com"));
        assert!(!may_create(&admin, "u2/123-x-photo.png"));
        assert!(may_create(&admin, "adm/123-x-photo.png"));
    }

    #[test]
    fn empty_admin_email_never_matches() {
        let p = principal("u1", "");
        assert!(!may_access(&p, "u2/x", ""));
    }

    #[test]
    fn prefix_match_requires_separator() {
        let p = principal("u1", "a@example.com");
        // "u12/..." must not be accessible to "u1".
        assert!(!may_access(&p, "u12/123-x-photo.png", "admin@example.com"));
    }

    #[test]
    fn unsafe_keys_rejected() {
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/u1/x").is_err());
        assert!(ensure_key_safe("u1/../etc/passwd").is_err());
        assert!(ensure_key_safe("u1/a\\b").is_err());
        assert!(ensure_key_safe("u1/ok.png").is_ok());
    }
}
