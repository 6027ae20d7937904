#![forbid(unsafe_code)]

//! Shared library for the VidGate binaries.
//!
//! VidGate is a small proxy backend in front of a third-party video
//! platform: searches are delegated to an external yt-dlp process and
//! playback is served either through the platform's embedded player or by
//! range-streaming a locally downloaded file that expires after a fixed
//! lifetime.

pub mod config;
pub mod runner;
pub mod search;
pub mod security;
pub mod store;
pub mod streaming;
