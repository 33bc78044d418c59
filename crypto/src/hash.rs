//! Blake2b-256 digests: canary fingerprints, audit chain links, device log
//! entries and payload ids.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    blake2b_256_multi(&[data])
}

/// Digest of the concatenation of `parts`. Part boundaries are not encoded;
/// callers that need them must frame the parts themselves.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let digest = parts
        .iter()
        .fold(Blake2b256::new(), |hasher, part| hasher.chain_update(*part))
        .finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_reference_digest() {
        let expected = [
            0x0e, 0x57, 0x51, 0xc0, 0x26, 0xe5, 0x43, 0xb2, 0xe8, 0xab, 0x2e, 0xb0, 0x60, 0x99,
            0xda, 0xa1, 0xd1, 0xe5, 0xdf, 0x47, 0x77, 0x8f, 0x77, 0x87, 0xfa, 0xab, 0x45, 0xcd,
            0xf1, 0x2f, 0xe3, 0xa8,
        ];
        assert_eq!(blake2b_256(b""), expected);
    }

    #[test]
    fn parts_hash_as_their_concatenation() {
        let seed: &[u8] = &[7u8; 32];
        let path: &[u8] = b"m/44'/195'/0'/0/0";
        let joined = [seed, path].concat();
        assert_eq!(blake2b_256_multi(&[seed, path]), blake2b_256(&joined));
        let (ab, c, a, bc): (&[u8], &[u8], &[u8], &[u8]) = (b"ab", b"c", b"a", b"bc");
        assert_eq!(blake2b_256_multi(&[ab, c]), blake2b_256_multi(&[a, bc]));
        assert_ne!(blake2b_256(b"canary"), blake2b_256(b"canarY"));
    }
}
