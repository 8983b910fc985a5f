//! Bearer-token primitives.
//!
//! A token is uniform random bytes, hex-encoded; only its bcrypt digest is
//! ever persisted. The first characters of the hex form act as a cache key
//! (a pointer to a session id), never as authentication material: every
//! lookup is confirmed by a full bcrypt comparison.

use rand::RngCore;

use crate::error::Result;

/// Characters of the token used as a cache key.
pub const PREFIX_LEN: usize = 16;

pub struct TokenPair {
    pub token: String,
    pub hash: String,
}

pub fn generate(token_bytes: usize, cost: u32) -> Result<TokenPair> {
    let mut buf = vec![0u8; token_bytes];
    rand::thread_rng().fill_bytes(&mut buf);

    let token = hex::encode(buf);
    let hash = bcrypt::hash(&token, cost)?;

    Ok(TokenPair { token, hash })
}

pub fn verify(token: &str, hash: &str) -> bool {
    bcrypt::verify(token, hash).unwrap_or(false)
}

pub fn prefix(token: &str) -> &str {
    &token[..PREFIX_LEN.min(token.len())]
}

pub fn valid_format(token: &str, token_bytes: usize) -> bool {
    token.len() == 2 * token_bytes && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    // low cost keeps the hash rounds out of the test wall clock
    const TEST_COST: u32 = 4;

    #[test]
    fn test_generated_token_shape() {
        let pair = generate(32, TEST_COST).unwrap();

        assert_eq!(pair.token.len(), 64);
        assert!(valid_format(&pair.token, 32));
        assert!(pair.hash.starts_with("$2"));
    }

    #[test]
    fn test_verify_roundtrip() {
        let pair = generate(16, TEST_COST).unwrap();

        assert!(verify(&pair.token, &pair.hash));
        assert!(!verify("0", &pair.hash));
    }

    #[test]
    fn test_verify_tolerates_garbage_hash() {
        assert!(!verify("deadbeef", "not-a-bcrypt-digest"));
    }

    #[test]
    fn test_valid_format_rejects_wrong_length_and_alphabet() {
        assert!(valid_format(&"a".repeat(64), 32));
        assert!(!valid_format(&"a".repeat(63), 32));
        assert!(!valid_format(&"a".repeat(65), 32));
        assert!(!valid_format(&"g".repeat(64), 32));
        assert!(!valid_format("", 32));
    }

    #[test]
    fn test_prefix_is_stable_and_bounded() {
        let pair = generate(32, TEST_COST).unwrap();

        assert_eq!(prefix(&pair.token).len(), PREFIX_LEN);
        assert!(pair.token.starts_with(prefix(&pair.token)));
        assert_eq!(prefix("short"), "short");
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate(32, TEST_COST).unwrap();
        let b = generate(32, TEST_COST).unwrap();

        assert_ne!(a.token, b.token);
    }
}
