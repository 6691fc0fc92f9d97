/// Storage backend contract.
///
/// A backend accepts fire-and-forget writes and answers reads. The only
/// trustworthy signal that a write landed is a later `holds` returning true.
///
/// Two pieces:
/// - **Storage**: the trait any backend implements (in-memory, disk, remote)
/// - **FaillibleStorage**: in-memory backend that drops writes on a plan
pub mod faillible;

use std::sync::Arc;

use crate::error::StorageError;
use crate::types::{Message, PublisherId};

pub use faillible::{FaillibleStorage, FailurePlan};

/// A storage target whose individual writes may silently fail.
///
/// Implementations must be safe for concurrent `store`/`holds` calls.
#[async_trait::async_trait]
pub trait Storage<M: Message>: Send + Sync {
    /// Short name used in logs, errors and metrics.
    fn name(&self) -> &str;

    /// Attempt to persist `message`. May be a silent no-op.
    ///
    /// Re-storing a message the backend already holds must not duplicate it.
    async fn store(&self, publisher: &PublisherId, message: &M);

    /// Whether `message` is currently persisted.
    ///
    /// Must reflect every `store` that took effect. An error here is fatal
    /// for the delivery in progress; the publisher does not retry it.
    async fn holds(&self, message: &M) -> Result<bool, StorageError>;
}

#[async_trait::async_trait]
impl<M, S> Storage<M> for Arc<S>
where
    M: Message,
    S: Storage<M> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn store(&self, publisher: &PublisherId, message: &M) {
        (**self).store(publisher, message).await
    }

    async fn holds(&self, message: &M) -> Result<bool, StorageError> {
        (**self).holds(message).await
    }
}
