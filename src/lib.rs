//! # tripdata-sync
//!
//! Batch transfer of the monthly NYC TLC trip-record archives from their
//! public HTTP mirror into an S3-compatible bucket.
//!
//! ## How a run works
//!
//! - The catalog expands categories × years × months into one task per file
//! - Every file is downloaded into a local staging directory by a bounded
//!   worker pool, with per-read timeouts and retries
//! - Once every download has resolved, a second pool uploads the staged files
//! - Work already done is detected and skipped on both sides, so an aborted
//!   run can simply be started again
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripdata_sync::{Config, Orchestrator, S3Repository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let repository = S3Repository::connect(&config).await?;
//!     let orchestrator = Orchestrator::new(config, Arc::new(repository))?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = orchestrator.run().await?;
//!     println!("{} files transferred", report.uploaded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Task catalog generation
pub mod catalog;
/// Configuration types
pub mod config;
/// Source downloads into the staging area
pub mod downloader;
/// Error types
pub mod error;
/// Two-phase pipeline and worker pool
pub mod orchestrator;
/// Retry logic with fixed or exponential backoff
pub mod retry;
/// Local staging directory
pub mod staging;
/// Destination object stores
pub mod store;
/// Core types
pub mod types;
/// Staging area to destination uploads
pub mod upload;

pub use config::{Config, DatasetConfig, KeyLayout, RetryConfig};
pub use downloader::{Downloader, Fetched};
pub use error::{
    AttemptError, DownloadError, Error, PrerequisiteError, Result, StoreError, UploadError,
};
pub use orchestrator::Orchestrator;
pub use staging::LocalStore;
pub use store::{
    BlobStore, BlobWriter, MemoryBlobStore, MemoryRepository, ObjectRepository, S3Repository,
};
pub use types::{
    Event, FileTask, LocalArtifact, Period, Phase, RunReport, RunState, TransferOutcome,
};
pub use upload::UploadManager;
