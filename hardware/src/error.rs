use crate::transport::TransportError;
use crate::DeviceFamily;

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device not connected: {0}")]
    NotConnected(String),

    #[error("no signer registered for {0}")]
    NoSigner(DeviceFamily),

    #[error("device {device_id} unreachable after {attempts} attempts: {last_error}")]
    DeviceUnreachable {
        device_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("device {device_id} did not answer within {secs}s")]
    Timeout { device_id: String, secs: u64 },

    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("{family} does not allow path {path}")]
    PathNotAllowed { family: DeviceFamily, path: String },

    #[error("derived key not found: {0}")]
    KeyNotFound(String),

    #[error("derived key limit reached ({0})")]
    KeyLimit(usize),

    #[error("unexpected device response to {0}")]
    Protocol(&'static str),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("crypto error: {0}")]
    Crypto(#[from] keyguard_crypto::CryptoError),
}

impl HardwareError {
    /// Failures worth retrying: timeouts and transient transport faults.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}
