//! Digest primitives used for revision identity.
//!
//! SHA-1 is the identity digest for generated revision IDs and merge
//! markers; MD5 survives only for the legacy rev-ID scheme.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::Md5;
use sha1::{Digest, Sha1};

/// SHA-1 over the concatenation of `parts`.
pub fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut ctx = Sha1::new();
    for part in parts {
        ctx.update(part);
    }
    ctx.finalize().into()
}

/// MD5 over the concatenation of `parts`.
pub fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut ctx = Md5::new();
    for part in parts {
        ctx.update(part);
    }
    ctx.finalize().into()
}

/// Standard base64 (with padding), as used for merge-marker authors.
pub fn base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// True if `s` contains only characters base64 output can produce.
pub fn is_base64(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|c| c.is_ascii_alphanumeric() || c == b'+' || c == b'/' || c == b'=')
}
