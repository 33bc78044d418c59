use proptest::prelude::*;

use keyguard_crypto::{
    derive_key, generate_keypair, open, seal, sign, verify, Cipher, KdfParams,
};
use keyguard_types::KeyType;

fn cipher_strategy() -> impl Strategy<Value = Cipher> {
    prop_oneof![Just(Cipher::Aes256Gcm), Just(Cipher::ChaCha20Poly1305)]
}

fn key_type_strategy() -> impl Strategy<Value = KeyType> {
    prop_oneof![Just(KeyType::Ed25519), Just(KeyType::Secp256k1)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// decrypt(encrypt(secret)) == secret for freshly generated keys.
    #[test]
    fn sealed_private_key_opens(cipher in cipher_strategy(), key_type in key_type_strategy(), kek in any::<[u8; 32]>()) {
        let (_, secret) = generate_keypair(key_type).unwrap();
        let sealed = seal(cipher, &kek, secret.as_bytes()).unwrap();
        let opened = open(cipher, &kek, &sealed).unwrap();
        prop_assert_eq!(opened.as_slice(), secret.as_bytes());
    }

    /// verify(sign(data)) holds for any payload.
    #[test]
    fn signature_verifies(key_type in key_type_strategy(), data in prop::collection::vec(any::<u8>(), 0..512)) {
        let (public, secret) = generate_keypair(key_type).unwrap();
        let sig = sign(key_type, secret.as_bytes(), &data).unwrap();
        prop_assert!(verify(key_type, public.as_bytes(), &data, sig.as_bytes()).unwrap());
    }

    /// Flipping any byte of a sealed blob makes it unopenable.
    #[test]
    fn any_bit_flip_is_detected(kek in any::<[u8; 32]>(), plaintext in prop::collection::vec(any::<u8>(), 1..64), pos in any::<prop::sample::Index>()) {
        let mut sealed = seal(Cipher::Aes256Gcm, &kek, &plaintext).unwrap();
        let i = pos.index(sealed.len());
        sealed[i] ^= 0x01;
        prop_assert!(open(Cipher::Aes256Gcm, &kek, &sealed).is_err());
    }
}

#[test]
fn derived_master_key_seals_and_opens() {
    let salt = keyguard_crypto::random_salt();
    let key = derive_key(b"Sw0rd!Fish", &salt, &KdfParams::light()).unwrap();
    let sealed = seal(Cipher::ChaCha20Poly1305, &key, b"canary").unwrap();
    let again = derive_key(b"Sw0rd!Fish", &salt, &KdfParams::light()).unwrap();
    assert_eq!(open(Cipher::ChaCha20Poly1305, &again, &sealed).unwrap().as_slice(), b"canary");
}
