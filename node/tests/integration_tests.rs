//! End-to-end custody flows through [`CustodyContext`]: every call goes
//! through the RBAC session gate and lands in the real keystore, vault,
//! rotation and multisig managers on disk.

use std::sync::Arc;

use keyguard_crypto::KdfParams;
use keyguard_hardware::{DerivationPreset, DeviceFamily};
use keyguard_keystore::{AccessLevel as VaultAccess, KeySpec, KeystoreError, StoreStatus, VaultStatus};
use keyguard_multisig::{AuthorizationScheme, SignerKeyKind, SignerSpec, TransactionStatus, TransactionType};
use keyguard_node::{CustodyContext, InitOptions, KeyguardConfig, NodeError};
use keyguard_nullables::{FakeTransport, ManualClock};
use keyguard_rbac::{AuditQuery, ClientInfo, Permission, RbacError, Role};
use keyguard_rotation::{RotationError, RotationTrigger, TaskStatus, HIGH_SECURITY_POLICY};
use keyguard_types::{KeyType, KeyUsage};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ADMIN: &str = "root";
const ADMIN_PASSWORD: &str = "correct horse battery";
const KEYSTORE_PASSPHRASE: &str = "keystore-pass";
const VAULT_PASSPHRASE: &str = "Sw0rd!Fish";

struct Harness {
    _dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    ctx: CustodyContext,
}

fn harness() -> Harness {
    harness_with(FakeTransport::new())
}

fn harness_with(transport: FakeTransport) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = KeyguardConfig::with_data_dir(dir.path());
    let light = KdfParams::light();
    config.kdf.memory_kib = light.memory_kib;
    config.kdf.iterations = light.iterations;
    config.kdf.parallelism = light.parallelism;

    let (clock, shared) = ManualClock::shared(1_700_000_000);
    CustodyContext::initialize(
        &config,
        shared.clone(),
        &InitOptions {
            name: "integration",
            admin_user: ADMIN,
            admin_password: ADMIN_PASSWORD,
            keystore_passphrase: KEYSTORE_PASSPHRASE,
            vault_passphrase: VAULT_PASSPHRASE,
        },
    )
    .expect("initialize");
    let ctx = CustodyContext::open(config, shared, Arc::new(transport)).expect("open");
    Harness {
        _dir: dir,
        clock,
        ctx,
    }
}

fn admin_session(ctx: &CustodyContext) -> String {
    ctx.login(ADMIN, ADMIN_PASSWORD, Role::Master, &ClientInfo::default())
        .expect("admin login")
        .session_id
}

/// Give `user` a role and a password, then log them in.
fn enroll(ctx: &CustodyContext, admin: &str, user: &str, role: Role) -> String {
    let password = format!("{user}-password");
    ctx.assign_role(admin, user, role).expect("assign role");
    ctx.set_credential(admin, user, &password).expect("set credential");
    ctx.login(user, &password, role, &ClientInfo::default())
        .expect("login")
        .session_id
}

fn signing_key(ctx: &CustodyContext, session: &str) -> String {
    ctx.generate_key(session, KeySpec::new(KeyType::Ed25519, KeyUsage::Signing))
        .expect("generate key")
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[test]
fn open_without_init_reports_not_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let (_, clock) = ManualClock::shared(0);
    let config = KeyguardConfig::with_data_dir(dir.path());
    let result = CustodyContext::open(config, clock, Arc::new(FakeTransport::new()));
    assert!(matches!(result, Err(NodeError::NotInitialized(_))));
}

#[test]
fn second_initialize_is_refused() {
    let h = harness();
    let (_, clock) = ManualClock::shared(0);
    let result = CustodyContext::initialize(
        h.ctx.config(),
        clock,
        &InitOptions {
            name: "again",
            admin_user: "mallory",
            admin_password: "pw",
            keystore_passphrase: "pw",
            vault_passphrase: "pw",
        },
    );
    assert!(matches!(result, Err(NodeError::AlreadyInitialized(_))));
}

#[test]
fn opened_context_starts_locked() {
    let h = harness();
    let status = h.ctx.status();
    assert_eq!(status.keystore.status, StoreStatus::Locked);
    assert_eq!(status.vault.status, VaultStatus::Locked);
    assert_eq!(status.rbac.users_with_credentials, 1);
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[test]
fn vault_sign_verify_and_wrong_passphrase() {
    let h = harness();
    let admin = admin_session(&h.ctx);

    let vault = h
        .ctx
        .unlock_vault(&admin, VAULT_PASSPHRASE, VaultAccess::ReadWrite)
        .expect("unlock vault");
    let key = h
        .ctx
        .vault_generate_key(&admin, &vault, KeyType::Ed25519, Some("hot"))
        .expect("vault key");
    let message = b"transfer 10 to bob";
    let sig = h.ctx.vault_sign(&admin, &vault, &key.key_id, message).unwrap();
    assert!(h.ctx.vault_verify(&admin, &vault, &key.key_id, message, sig.as_bytes()).unwrap());
    assert!(!h
        .ctx
        .vault_verify(&admin, &vault, &key.key_id, b"transfer 99 to eve", sig.as_bytes())
        .unwrap());

    h.ctx.lock_vault(&admin).unwrap();
    let err = h
        .ctx
        .unlock_vault(&admin, "swordfish", VaultAccess::ReadWrite)
        .unwrap_err();
    assert!(matches!(err, NodeError::Keystore(KeystoreError::WrongPassphrase)));
    assert_eq!(h.ctx.status().vault.failed_attempts, 1);
}

#[test]
fn vault_level_is_bounded_by_role() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    let viewer = enroll(&h.ctx, &admin, "vera", Role::Viewer);

    assert!(h
        .ctx
        .unlock_vault(&viewer, VAULT_PASSPHRASE, VaultAccess::ReadOnly)
        .is_ok());
    let err = h
        .ctx
        .unlock_vault(&viewer, VAULT_PASSPHRASE, VaultAccess::ReadWrite)
        .unwrap_err();
    assert!(err.is_denial());
}

// ---------------------------------------------------------------------------
// Keystore
// ---------------------------------------------------------------------------

#[test]
fn keystore_sign_needs_unlock_and_permission() {
    let h = harness();
    let admin = admin_session(&h.ctx);

    let err = h
        .ctx
        .generate_key(&admin, KeySpec::new(KeyType::Ed25519, KeyUsage::Signing))
        .unwrap_err();
    assert!(matches!(err, NodeError::Keystore(KeystoreError::StoreLocked)));

    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();
    let key = signing_key(&h.ctx, &admin);
    let sig = h.ctx.sign(&admin, &key, b"payload").unwrap();
    assert!(h.ctx.verify(&admin, &key, b"payload", sig.as_bytes()).unwrap());

    let viewer = enroll(&h.ctx, &admin, "vera", Role::Viewer);
    assert!(h.ctx.key_info(&viewer, &key).is_ok());
    let err = h.ctx.sign(&viewer, &key, b"payload").unwrap_err();
    assert!(matches!(
        err,
        NodeError::Rbac(RbacError::PermissionDenied {
            role: Role::Viewer,
            permission: Permission::SignTransaction
        })
    ));
}

#[test]
fn exported_key_signs_like_the_store() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();
    let key = signing_key(&h.ctx, &admin);

    let secret = h.ctx.export_key(&admin, &key).unwrap();
    let sig = keyguard_crypto::sign(KeyType::Ed25519, secret.as_bytes(), b"same").unwrap();
    assert!(h.ctx.verify(&admin, &key, b"same", sig.as_bytes()).unwrap());
}

// ---------------------------------------------------------------------------
// Multisig
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_of_three_multisig_with_late_signer() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();

    let keys: Vec<String> = (0..3).map(|_| signing_key(&h.ctx, &admin)).collect();
    let signers = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let public = h.ctx.public_key(&admin, key).unwrap();
            SignerSpec::new(format!("s{}", i + 1), SignerKeyKind::Ed25519, public)
        })
        .collect();
    let wallet = h
        .ctx
        .create_multisig_wallet(&admin, "treasury", AuthorizationScheme::MultiKey, signers, 2)
        .unwrap();
    let tx = h
        .ctx
        .create_multisig_transaction(
            &admin,
            &wallet,
            TransactionType::Transfer,
            b"send 5 BTC to cold storage".to_vec(),
            "sweep",
            None,
        )
        .unwrap();

    let status = h.ctx.sign_multisig_with_key(&admin, &tx, "s1", &keys[0]).unwrap();
    assert_eq!(status, TransactionStatus::Signing);
    let status = h.ctx.sign_multisig_with_key(&admin, &tx, "s2", &keys[1]).unwrap();
    assert_eq!(status, TransactionStatus::Completed);

    let late = h.ctx.sign_multisig_with_key(&admin, &tx, "s3", &keys[2]).unwrap();
    assert_eq!(late, TransactionStatus::Completed);

    let info = h.ctx.multisig_status(&admin, &tx).unwrap();
    assert_eq!(info.collected_signatures, 2);
    assert!(info.has_authorization);
    let authorization = h.ctx.multisig_authorization(&admin, &tx).unwrap().unwrap();
    assert_eq!(authorization.participants(), vec!["s1", "s2"]);
}

#[tokio::test]
async fn viewer_cannot_create_multisig_transactions() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    let viewer = enroll(&h.ctx, &admin, "vera", Role::Viewer);
    let err = h
        .ctx
        .create_multisig_transaction(&viewer, "any", TransactionType::Transfer, vec![1], "", None)
        .unwrap_err();
    assert!(err.is_denial());
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

#[test]
fn high_security_rotation_needs_two_approvals() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();
    let alice = enroll(&h.ctx, &admin, "alice", Role::Operator);
    let bob = enroll(&h.ctx, &admin, "bob", Role::Operator);

    let key = signing_key(&h.ctx, &admin);
    h.ctx
        .register_for_rotation(&admin, &key, Some(HIGH_SECURITY_POLICY))
        .unwrap();
    let before = h.ctx.rotation_status(&admin, &key).unwrap().key.active_key_id;

    let err = h
        .ctx
        .rotate_key(&admin, &key, RotationTrigger::Manual, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Rotation(RotationError::InsufficientApprovals {
            required: 2,
            provided: 0
        })
    ));

    let approvers = vec!["alice".to_string(), "bob".to_string()];
    let task = h
        .ctx
        .rotate_key(&admin, &key, RotationTrigger::Manual, &approvers)
        .unwrap();
    assert_eq!(h.ctx.approve_rotation(&alice, &task).unwrap(), TaskStatus::Pending);
    assert_eq!(h.ctx.approve_rotation(&bob, &task).unwrap(), TaskStatus::Completed);

    let after = h.ctx.rotation_status(&admin, &key).unwrap().key.active_key_id;
    assert_ne!(before, after);
}

#[test]
fn viewer_cannot_rotate() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();
    let key = signing_key(&h.ctx, &admin);
    h.ctx.register_for_rotation(&admin, &key, None).unwrap();

    let viewer = enroll(&h.ctx, &admin, "vera", Role::Viewer);
    let err = h
        .ctx
        .rotate_key(&viewer, &key, RotationTrigger::Manual, &[])
        .unwrap_err();
    assert!(err.is_denial());
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hardware_sign_through_the_gate() {
    let h = harness_with(FakeTransport::new().with_device("ledger-1", DeviceFamily::Ledger));
    let admin = admin_session(&h.ctx);

    let devices = h.ctx.discover_devices(&admin).await.unwrap();
    assert!(devices.iter().any(|d| d.device_id == "ledger-1"));
    h.ctx
        .connect_device(&admin, "ledger-1", DeviceFamily::Ledger)
        .await
        .unwrap();
    let derived = h
        .ctx
        .derive_device_key(&admin, "ledger-1", DerivationPreset::Standard, None)
        .await
        .unwrap();
    let sig = h
        .ctx
        .device_sign(&admin, "ledger-1", b"hw payload", Some(&derived.key_id), None)
        .await
        .unwrap();
    assert!(h
        .ctx
        .device_verify(&admin, "ledger-1", b"hw payload", sig.as_bytes(), Some(&derived.key_id))
        .await
        .unwrap());
}

// ---------------------------------------------------------------------------
// RBAC
// ---------------------------------------------------------------------------

#[test]
fn repeated_bad_logins_lock_the_user_out() {
    let h = harness();
    for _ in 0..5 {
        let err = h
            .ctx
            .login(ADMIN, "wrong", Role::Master, &ClientInfo::default())
            .unwrap_err();
        assert!(matches!(err, NodeError::Rbac(RbacError::InvalidCredentials)));
    }
    let err = h
        .ctx
        .login(ADMIN, ADMIN_PASSWORD, Role::Master, &ClientInfo::default())
        .unwrap_err();
    assert!(matches!(err, NodeError::Rbac(RbacError::LockedOut { .. })));

    h.clock.advance(1801);
    assert!(h
        .ctx
        .login(ADMIN, ADMIN_PASSWORD, Role::Master, &ClientInfo::default())
        .is_ok());
}

#[test]
fn viewer_cannot_lock_the_stores() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();
    h.ctx
        .unlock_vault(&admin, VAULT_PASSPHRASE, VaultAccess::ReadWrite)
        .unwrap();
    let viewer = enroll(&h.ctx, &admin, "vera", Role::Viewer);

    for err in [
        h.ctx.lock_keystore(&viewer).unwrap_err(),
        h.ctx.lock_vault(&viewer).unwrap_err(),
    ] {
        assert!(matches!(
            err,
            NodeError::Rbac(RbacError::PermissionDenied {
                role: Role::Viewer,
                permission: Permission::SignTransaction
            })
        ));
    }
    let status = h.ctx.status();
    assert_eq!(status.keystore.status, StoreStatus::Ready);
    assert_eq!(status.vault.status, VaultStatus::Unlocked);

    let user = enroll(&h.ctx, &admin, "uma", Role::User);
    h.ctx.lock_keystore(&user).unwrap();
    h.ctx.lock_vault(&user).unwrap();
    let status = h.ctx.status();
    assert_eq!(status.keystore.status, StoreStatus::Locked);
    assert_eq!(status.vault.status, VaultStatus::Locked);
}

#[test]
fn logout_ends_the_session() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    h.ctx.logout(&admin).unwrap();
    let err = h.ctx.lock_keystore(&admin).unwrap_err();
    assert!(matches!(err, NodeError::Rbac(RbacError::SessionRevoked(_))));
}

#[test]
fn denials_are_audited() {
    let h = harness();
    let admin = admin_session(&h.ctx);
    let viewer = enroll(&h.ctx, &admin, "vera", Role::Viewer);
    let _ = h.ctx.backup_keystore(&viewer, std::path::Path::new("/nonexistent"));

    let denied = h
        .ctx
        .audit_log(
            &admin,
            &AuditQuery {
                actor: Some("vera".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(denied
        .iter()
        .any(|e| e.result == keyguard_rbac::AuditResult::Denied && e.resource.starts_with("keystore")));
    assert!(h.ctx.verify_audit_chain(&admin).unwrap() > 0);
    assert!(h.ctx.verify_audit_chain(&viewer).is_err());
}

#[test]
fn status_serializes_for_the_cli() {
    let h = harness();
    let json = serde_json::to_value(h.ctx.status()).unwrap();
    assert_eq!(json["rbac"]["users_with_credentials"], 1);
    assert_eq!(json["vault"]["failed_attempts"], 0);
}

#[tokio::test]
async fn multisig_mixes_keystore_and_device_signers() {
    let h = harness_with(FakeTransport::new().with_device("trezor-1", DeviceFamily::Trezor));
    let admin = admin_session(&h.ctx);
    h.ctx.unlock_keystore(&admin, KEYSTORE_PASSPHRASE).unwrap();

    let soft = signing_key(&h.ctx, &admin);
    h.ctx
        .connect_device(&admin, "trezor-1", DeviceFamily::Trezor)
        .await
        .unwrap();
    let device_key = h
        .ctx
        .derive_device_key(&admin, "trezor-1", DerivationPreset::Multisig, None)
        .await
        .unwrap();

    let signers = vec![
        SignerSpec::new("soft", SignerKeyKind::Ed25519, h.ctx.public_key(&admin, &soft).unwrap()),
        SignerSpec::new("device", SignerKeyKind::Ed25519, device_key.public_key.clone()),
    ];
    let wallet = h
        .ctx
        .create_multisig_wallet(&admin, "ops", AuthorizationScheme::MultiKey, signers, 2)
        .unwrap();
    let tx = h
        .ctx
        .create_multisig_transaction(&admin, &wallet, TransactionType::ContractCall, vec![7; 32], "", None)
        .unwrap();

    h.ctx.sign_multisig_with_key(&admin, &tx, "soft", &soft).unwrap();
    let status = h
        .ctx
        .sign_multisig_with_device(&admin, &tx, "device", "trezor-1", &device_key.key_id)
        .await
        .unwrap();
    assert_eq!(status, TransactionStatus::Completed);
}
