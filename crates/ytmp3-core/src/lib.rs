//! ytmp3-core: playlist download, loudness normalization and duration checks for ytmp3

pub mod config;
pub mod error;
pub mod extractor;
pub mod library;
pub mod locator;
pub mod normalizer;
pub mod pipeline;
pub mod validator;

pub use config::Config;
pub use error::{Result, Ytmp3Error};
