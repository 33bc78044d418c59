//! Random identifiers for keys, sessions, tasks and transactions.

use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes in an identifier (rendered as 32 hex chars).
pub const ID_BYTES: usize = 16;

/// Generate a fresh random identifier as lowercase hex.
pub fn random_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_hex_and_unique() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), ID_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
