//! Cliniq - clinical question answering library
//!
//! This library provides the conversation engine behind the Cliniq CLI: it
//! streams answers from a generation service, keeps the conversation's
//! question/answer threads, persists them, and tracks quota and feedback.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Conversation state and the per-question streaming driver
//! - `stream`: Generation service abstraction and the SSE client
//! - `citations`: Citation normalization and visibility
//! - `storage`: Thread persistence (`sled` and in-memory)
//! - `effects`: Non-critical side effects run after an answer completes
//! - `quota`: Remaining question tracking
//! - `feedback`: Feedback records and the prompt gate
//! - `config`: Configuration management and validation
//! - `logging`: Tracing subscriber setup
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cliniq::{Config, Session, SessionIdentity};
//! use cliniq::storage::SledThreadStore;
//! use cliniq::stream::http::HttpGenerationClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let store = Arc::new(SledThreadStore::new(config.storage.resolve_path()?)?);
//!     let service = Arc::new(HttpGenerationClient::from_config(&config.service)?);
//!     let session = Session::new(SessionIdentity::new("user-1"), service, store, &config);
//!     session.ask("First-line treatment for community-acquired pneumonia?", false).await?;
//!     Ok(())
//! }
//! ```

pub mod citations;
pub mod cli;
pub mod commands;
pub mod config;
pub mod effects;
pub mod error;
pub mod feedback;
pub mod logging;
pub mod quota;
pub mod session;
pub mod storage;
pub mod stream;

// Re-export commonly used types
pub use citations::{Citation, CitationMap};
pub use config::Config;
pub use error::{CliniqError, Result, StreamFailure};
pub use session::{AskOutcome, Session, SessionEvent, SessionIdentity};
