//! Encoding modules for the library transcoder

pub mod handbrake;

pub use handbrake::{build_handbrake_command, HandbrakeParams};
