//! Infrastructure layer: published-version persistence, config, processing.

pub mod config;
pub mod processor;
pub mod published_version;
pub mod workers;
