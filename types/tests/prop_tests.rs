use proptest::prelude::*;

use keyguard_types::{PublicKeyBytes, SignatureBytes, Timestamp};

proptest! {
    /// Timestamp ordering: new(a) <= new(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta <= tb, a <= b);
        prop_assert_eq!(ta == tb, a == b);
    }

    /// Timestamp elapsed_since: elapsed_since(now) = now - self (saturating).
    #[test]
    fn timestamp_elapsed_since(base in 0u64..1_000_000, offset in 0u64..1_000_000) {
        let t = Timestamp::new(base);
        let now = Timestamp::new(base + offset);
        prop_assert_eq!(t.elapsed_since(now), offset);
    }

    /// has_expired agrees with manual arithmetic.
    #[test]
    fn timestamp_has_expired(base in 0u64..1_000_000, dur in 0u64..1_000_000, now in 0u64..3_000_000) {
        let t = Timestamp::new(base);
        prop_assert_eq!(t.has_expired(dur, Timestamp::new(now)), now >= base + dur);
    }

    /// plus_secs then secs_until gives back the offset.
    #[test]
    fn plus_secs_secs_until(base in 0u64..1_000_000, offset in 0u64..1_000_000) {
        let now = Timestamp::new(base);
        prop_assert_eq!(now.plus_secs(offset).secs_until(now), offset);
    }

    /// Hex-encoded byte wrappers survive JSON.
    #[test]
    fn byte_wrappers_json(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let pk = PublicKeyBytes(bytes.clone());
        let sig = SignatureBytes(bytes);
        let pk_back: PublicKeyBytes = serde_json::from_str(&serde_json::to_string(&pk).unwrap()).unwrap();
        let sig_back: SignatureBytes = serde_json::from_str(&serde_json::to_string(&sig).unwrap()).unwrap();
        prop_assert_eq!(pk_back, pk);
        prop_assert_eq!(sig_back, sig);
    }
}
