//! Image generation and processing pipeline for Google's Gemini image models.
//!
//! The pipeline runs strictly left to right for a single request: resolve a
//! model id, post one `generateContent` request (with the at-most-once
//! aspect-ratio correction), decode the inline image part, optionally
//! post-process the pixels, and package the result.
//!
//! ```text
//! ModelState::resolve -> GenerationClient::generate_raw -> decode_response
//!     -> [process::resize] -> output::assemble
//! ```
//!
//! Each call is independent; the only shared mutable state is the client's
//! current-model selection, which sits behind one guarded accessor. How these
//! operations are exposed to a host (tool registration, CLI, credential
//! storage) is deliberately out of scope: the crate returns typed results
//! and structured errors and never terminates the process.
//!
//! # Example
//!
//! ```no_run
//! use gemini_imagen::{Config, Destination, GenerateParams, GenerationClient, output};
//!
//! # async fn run() -> gemini_imagen::Result<()> {
//! let client = GenerationClient::new(Config::new("api-key"));
//! let image = client.generate(&GenerateParams::new("a red circle")).await?;
//! let record = output::assemble(&image, &Destination::file("circle.png")).await?;
//! # let _ = record;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod models;
pub mod output;
pub mod process;
pub mod selector;

pub use client::{AspectRatio, GenerateParams, GenerationClient, ReferenceImage};
pub use config::Config;
pub use decode::{ImageResult, decode_response, infer_extension};
pub use error::{ConfigError, Error, Result, ValidationError};
pub use models::{DEFAULT_MODEL_ID, ModelDescriptor};
pub use output::{Destination, InlinePayload, OutputRecord, SavedFile, assemble};
pub use process::{ConversionSpec, OutputFormat, ResizeSpec, TargetFormat, convert, resize};
pub use selector::ModelState;
