use std::collections::BTreeSet;
use std::sync::Arc;

use keyguard_crypto::{generate_keypair, sign};
use keyguard_multisig::{
    AuthorizationScheme, MultisigManager, MultisigSettings, SignerKeyKind, SignerSpec,
    TransactionStatus, TransactionType,
};
use keyguard_nullables::ManualClock;
use keyguard_types::KeyType;
use proptest::prelude::*;

fn submissions() -> impl Strategy<Value = (usize, u32, Vec<(usize, bool)>)> {
    (2usize..=5).prop_flat_map(|n| {
        (
            Just(n),
            2u32..=n as u32,
            prop::collection::vec((0..n, any::<bool>()), 0..12),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Completion needs `threshold` distinct verified signers, and the
    /// authorization is fixed by the first `threshold` of them.
    #[test]
    fn never_completes_below_threshold((n, threshold, events) in submissions()) {
        let (_, clock) = ManualClock::shared(1_000);
        let manager = Arc::new(MultisigManager::new(clock, MultisigSettings::default()).unwrap());
        let keys: Vec<_> = (0..n).map(|_| generate_keypair(KeyType::Ed25519).unwrap()).collect();
        let specs = keys
            .iter()
            .enumerate()
            .map(|(i, (public, _))| SignerSpec::new(format!("s{i}"), SignerKeyKind::Ed25519, public.clone()))
            .collect();
        let wallet = manager
            .create_wallet("w", "", AuthorizationScheme::MultiKey, specs, threshold, "ops")
            .unwrap();
        let payload = b"payload".to_vec();
        let tx = manager
            .create_transaction(&wallet, TransactionType::Transfer, payload.clone(), "", "ops", None)
            .unwrap();

        let mut accepted: Vec<String> = Vec::new();
        for (i, valid) in events {
            let (public, secret) = &keys[i];
            let message: &[u8] = if valid { &payload } else { b"forged" };
            let signature = sign(KeyType::Ed25519, secret.as_bytes(), message).unwrap();
            let signer = format!("s{i}");
            let result = manager.submit_signature(&tx, &signer, signature, public);
            let fresh = valid && !accepted.contains(&signer);
            prop_assert_eq!(result.is_ok(), fresh);
            if fresh {
                accepted.push(signer);
            }

            let status = manager.get_status(&tx).unwrap().status;
            let expected = if accepted.len() as u32 >= threshold {
                TransactionStatus::Completed
            } else {
                TransactionStatus::Signing
            };
            prop_assert_eq!(status, expected);
        }

        if let Some(authorization) = manager.authorization(&tx).unwrap() {
            authorization.verify(&payload).unwrap();
            let participants: BTreeSet<&str> = authorization.participants().into_iter().collect();
            let first: BTreeSet<&str> = accepted
                .iter()
                .take(threshold as usize)
                .map(String::as_str)
                .collect();
            prop_assert_eq!(participants, first);
        } else {
            prop_assert!((accepted.len() as u32) < threshold);
        }
    }
}
