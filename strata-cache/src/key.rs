//! Cache key derivation.
//!
//! The on-wire key for a typed entry is a fingerprint of the value's type
//! plus the caller's key fragments. Deriving the key from the type keeps two
//! different record types from colliding on the same user key, and keeps the
//! derivation a pure function so every process sharing a backend computes
//! identical keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest, Md5};

/// Type token for `T`: the type's textual shape with module paths stripped
/// from every segment.
///
/// `User` stays `User`, `Vec<User>` stays `Vec<User>`,
/// `HashMap<String, i64>` stays `HashMap<String, i64>`. Reference
/// indirection is stripped so `&User` and `User` agree.
pub fn type_token<T: ?Sized>() -> String {
    strip_paths(std::any::type_name::<T>())
}

fn strip_paths(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for c in full.chars() {
        match c {
            '<' | '>' | ',' | '(' | ')' | '[' | ']' | ';' | ' ' => {
                out.push_str(last_path_segment(&segment));
                segment.clear();
                if c != ' ' || !out.ends_with(' ') {
                    out.push(c);
                }
            }
            '&' => {
                // drop reference indirection
                segment.clear();
            }
            _ => segment.push(c),
        }
    }
    out.push_str(last_path_segment(&segment));
    out
}

fn last_path_segment(segment: &str) -> &str {
    segment.rsplit("::").next().unwrap_or(segment)
}

/// Base64-encoded MD5 of `text`.
pub fn md5_base64(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Hex-encoded MD5 of `text`.
pub fn md5_hex(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint used as the on-wire cache key for a typed entry:
/// `base64(md5(type_token(T) + "_" + parts.join("_")))`.
pub fn cache_key<T: ?Sized>(parts: &[&str]) -> String {
    md5_base64(&format!("{}_{}", type_token::<T>(), parts.join("_")))
}
