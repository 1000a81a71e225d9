#![forbid(unsafe_code)]

//! Download a video's best video-only and audio streams separately, then mux
//! them into one file with an external tool such as `ffmpeg`.
//!
//! The `ytd` binary is a thin shell around [`pipeline::Pipeline`]; everything
//! it needs (settings, the provider, the merger) is passed in explicitly so the
//! same flow runs against in-memory doubles in tests.

pub mod config;
pub mod download;
pub mod error;
pub mod merge;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod select;
pub mod slug;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
