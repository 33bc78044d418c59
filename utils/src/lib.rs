//! Shared utilities for keyguard.

pub mod fs;
pub mod logging;
pub mod time;

pub use fs::{read_json, write_atomic, write_json_atomic};
pub use logging::{init_tracing, LogFormat};
pub use time::format_duration;
