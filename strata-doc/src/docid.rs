//! Generated document IDs.

use rand::RngCore;

const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// 22 random base64 characters (132 bits of entropy).
const ID_LENGTH: usize = 22;

/// Generate a document ID: a `-` prefix followed by 22 URL-safe base64
/// characters of randomness.
pub fn generate_doc_id() -> String {
    let mut random = [0u8; ID_LENGTH];
    rand::thread_rng().fill_bytes(&mut random);

    let mut id = String::with_capacity(1 + ID_LENGTH);
    id.push('-');
    for byte in random {
        id.push(ALPHABET[(byte % 64) as usize] as char);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape() {
        let id = generate_doc_id();
        assert_eq!(id.len(), 23);
        assert!(id.starts_with('-'));
        assert!(id[1..].bytes().all(|c| ALPHABET.contains(&c)));
    }

    #[test]
    fn test_unique() {
        assert_ne!(generate_doc_id(), generate_doc_id());
    }
}
