use std::fmt;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Anything the publisher can deliver.
///
/// The core only needs equality and hashing (for the confirmation sets and
/// the backends' held-sets). No ordering or payload semantics.
pub trait Message: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Message for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Session-scoped identity of a publisher, attached to every write attempt.
///
/// Generated once per [`ResilientPublisher`](crate::ResilientPublisher).
/// Displayed as 32 lowercase hex digits, no dashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublisherId(Uuid);

impl PublisherId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PublisherId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.simple().to_string();
        write!(f, "PublisherId({}...)", &hex[..8])
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
