//! Nullable infrastructure for deterministic testing.
//!
//! External dependencies (wall-clock time, hardware devices) are abstracted
//! behind traits. This crate provides test-friendly implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch real devices
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod transport;

pub use clock::ManualClock;
pub use transport::{FakeDevice, FakeTransport};
