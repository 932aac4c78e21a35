//! Video analyzer core
//!
//! Catalogs a directory tree of video files into a queryable SQLite
//! library: ffprobe-driven metadata extraction with HDR and immersive-audio
//! classification, a pausable/resumable scan engine with durable
//! checkpoints, duplicate detection and decode-based integrity checking.
//! The CLI binary is a thin client of this surface.

pub mod cli;
pub mod config;
pub mod db;
pub mod services;
