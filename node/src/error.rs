use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("keystore error: {0}")]
    Keystore(#[from] keyguard_keystore::KeystoreError),

    #[error("hardware error: {0}")]
    Hardware(#[from] keyguard_hardware::HardwareError),

    #[error("rotation error: {0}")]
    Rotation(#[from] keyguard_rotation::RotationError),

    #[error("multisig error: {0}")]
    Multisig(#[from] keyguard_multisig::MultisigError),

    #[error("access denied: {0}")]
    Rbac(#[from] keyguard_rbac::RbacError),

    #[error("config error: {0}")]
    Config(String),

    #[error("no custody data at {0}, run `keyguard init` first")]
    NotInitialized(String),

    #[error("custody data already exists at {0}")]
    AlreadyInitialized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}

impl NodeError {
    /// Whether the session gate refused the call.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Rbac(e) if e.is_denial())
    }
}
