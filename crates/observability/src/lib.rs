//! Process-wide logging setup shared by the binaries.

pub mod logging;

pub use logging::{LogFormat, UnknownLogFormat, init};
