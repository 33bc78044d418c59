use proptest::prelude::*;

use keyguard_crypto::KdfParams;
use keyguard_keystore::{KeySpec, KeyStore, KeyStoreSettings};
use keyguard_types::{KeyType, KeyUsage, SystemClock};

fn key_type_strategy() -> impl Strategy<Value = KeyType> {
    prop_oneof![Just(KeyType::Ed25519), Just(KeyType::Secp256k1)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever goes in through import comes back out of the scoped
    /// accessor, and the key signs verifiably.
    #[test]
    fn imported_secret_round_trips(key_type in key_type_strategy(), secret in any::<[u8; 32]>(), data in prop::collection::vec(any::<u8>(), 0..256)) {
        let spec = KeySpec::new(key_type, KeyUsage::Signing);
        let dir = tempfile::tempdir().unwrap();
        let settings = KeyStoreSettings { kdf: KdfParams::light(), ..Default::default() };
        let store = KeyStore::init(dir.path(), "prop", "pw", settings, SystemClock::shared()).unwrap();

        // Zero and out-of-range scalars are not valid secp256k1 keys.
        let id = match store.import_key(spec, &secret) {
            Ok(id) => id,
            Err(_) => return Ok(()),
        };
        let recovered = store.with_private_key(&id, |s| s.to_vec()).unwrap();
        prop_assert_eq!(recovered.as_slice(), &secret[..]);

        let sig = store.sign(&id, &data).unwrap();
        prop_assert!(store.verify(&id, &data, sig.as_bytes()).unwrap());
    }
}
