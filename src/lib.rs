//! spotify-dl library - catalog lookup and the four-phase download pipeline.

pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod models;
pub mod namer;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod safety;
pub mod sanitize;
pub mod scanner;
pub mod source;
pub mod subscriptions;
pub mod sweep;
pub mod tags;
pub mod tracker;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod testing;
