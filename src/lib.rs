//! selkies-mirror - X11 screen mirroring core
//!
//! Copies the root window of an X11 screen into a sink buffer whenever it is
//! damaged, and keeps the screen at the resolution of the display behind the
//! sink.

pub mod capture;
pub mod config;
pub mod cursor;
pub mod error;
pub mod geometry;
pub mod mirror;
pub mod resize;
pub mod sink;
pub mod source;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::Config;
pub use error::MirrorError;
pub use mirror::{Mirror, MirrorOptions};
