//! Artist identity resolution and matching for tagging radio-show tracks in a
//! beets library - shared modules for all binaries.

pub mod builder;
pub mod cache;
pub mod cleaner;
pub mod client;
pub mod config;
pub mod episodes;
pub mod error;
pub mod library;
pub mod matcher;
pub mod models;
pub mod musicbrainz;
pub mod normalize;
pub mod pacer;
pub mod preview;
pub mod progress;
pub mod safety;
pub mod scoring;

pub use error::{Error, Result};
