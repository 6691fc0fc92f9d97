//! Transat: resilient publish over faillible storage.
//!
//! A [`ResilientPublisher`] hands every message to every configured
//! [`Storage`] backend. Backend writes may be silently dropped, so each
//! write is followed by a read; only a read that sees the message confirms
//! it. Confirmations are memoized per backend, which makes a repeated `send`
//! of the same message free.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transat::{FaillibleStorage, FailurePlan, PublisherConfig, ResilientPublisher};
//!
//! # async fn example() -> Result<(), transat::TransatError> {
//! let primary = Arc::new(FaillibleStorage::new("primary", FailurePlan::Never));
//! let secondary = Arc::new(FaillibleStorage::new("secondary", FailurePlan::DropFirst(3)));
//!
//! let publisher: ResilientPublisher<u32> =
//!     ResilientPublisher::pair(primary.clone(), secondary.clone(), PublisherConfig::new());
//!
//! publisher.send(42).await?;
//! assert!(primary.values().contains(&42));
//! assert!(secondary.values().contains(&42));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod storage;
pub mod types;

pub use config::{ConfirmOrder, PublisherConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};
pub use error::{StorageError, TransatError};
pub use metrics::{BackendMetrics, BackendSnapshot, Counter};
pub use publisher::ResilientPublisher;
pub use storage::{FaillibleStorage, FailurePlan, Storage};
pub use types::{now_ms, Message, PublisherId};

// Re-exported so callers don't need a direct tokio-util dependency for
// `send_with_cancel`.
pub use tokio_util::sync::CancellationToken;
