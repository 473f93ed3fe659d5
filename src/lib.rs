//! # restupload
//!
//! A streaming upload engine for REST origin services.
//!
//! ## Overview
//!
//! restupload transfers payloads of known, unknown or very large size to the
//! storage backend an origin service points it at. The origin answers an
//! upload query with a descriptor; the engine picks one of three wire
//! protocols from it and hides the differences behind one call.
//!
//! ## Features
//!
//! - **Single PUT**: whole payload in one request, for known lengths up to 5GB
//! - **Chunked PUT**: fixed-size parts with a `Content-Range`, sent in parallel
//! - **Cloud multipart**: growing part sizes, requests signed by the origin
//!   service so the storage secret never reaches the client
//! - **Stall detection**: reads that stop making progress fail fast and are
//!   retried instead of hanging
//! - **Bounded retries**: exponential backoff per part, parts spooled to disk
//!   so a retry never re-reads the source
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use restupload::api::RestClient;
//! use restupload::config::{ApiConfig, UploadConfig};
//! use restupload::transport::ReqwestTransport;
//! use restupload::upload::{UploadOptions, Uploader};
//! use reqwest::Method;
//! use serde_json::json;
//!
//! # async fn example() -> restupload::Result<()> {
//! let api = Arc::new(RestClient::new(ApiConfig::default())?);
//! let uploader = Uploader::new(api, Arc::new(ReqwestTransport::new()?), UploadConfig::default());
//!
//! let file = tokio::fs::File::open("/tmp/video.mp4").await?;
//! let length = file.metadata().await?.len();
//! let response = uploader
//!     .upload(
//!         "Drive/Item:upload",
//!         Method::POST,
//!         json!({"filename": "video.mp4"}),
//!         file,
//!         "video/mp4",
//!         Some(length),
//!         &UploadOptions::default(),
//!     )
//!     .await?;
//! println!("{}", response.data);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`api`]: Origin service envelope API and its HTTP client
//! - [`transport`]: Raw HTTP transport for data-carrying requests
//! - [`upload`]: Strategy selection, orchestrators, signing, retries
//! - [`config`]: YAML and environment configuration
//! - [`cli`]: Command-line interface definitions
//! - [`constants`]: Engine-wide constants
//! - [`error`]: Error taxonomy

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Origin service REST API
pub mod api;

/// Configuration management
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Upload engine error types
pub mod error;

/// HTTP transport for part and payload requests
pub mod transport;

/// The upload engine
pub mod upload;

/// Hashing helpers
pub mod utils;

pub use error::UploadError;

/// Result type of the upload engine
pub type Result<T> = std::result::Result<T, UploadError>;
