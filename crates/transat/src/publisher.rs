/// ResilientPublisher: hands every message to every backend, exactly once each.
///
/// Writes are fire-and-forget, so each backend is driven with a
/// write-then-read loop: `store`, then `holds`; on a miss, sleep the fixed
/// retry interval and go again. A message enters a backend's confirmation set
/// only after `holds` returned true, and confirmation sets never shrink.
///
/// Confirmation sets are a memo, not the source of truth: the backends'
/// held-sets are. They make a repeated `send` of a confirmed message free.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfirmOrder, PublisherConfig};
use crate::error::TransatError;
use crate::metrics::{BackendMetrics, BackendSnapshot};
use crate::storage::Storage;
use crate::types::{now_ms, Message, PublisherId};

/// One configured backend and what this publisher knows about it.
struct Backend<M> {
    storage: Arc<dyn Storage<M>>,
    confirmed: Mutex<HashSet<M>>,
    metrics: BackendMetrics,
}

impl<M: Message> Backend<M> {
    fn new(storage: Arc<dyn Storage<M>>) -> Self {
        Self {
            storage,
            confirmed: Mutex::new(HashSet::new()),
            metrics: BackendMetrics::new(),
        }
    }

    fn name(&self) -> &str {
        self.storage.name()
    }

    fn is_confirmed(&self, message: &M) -> bool {
        self.confirmed_set().contains(message)
    }

    /// Returns false if another caller confirmed it first.
    fn confirm(&self, message: M) -> bool {
        self.confirmed_set().insert(message)
    }

    fn confirmed_set(&self) -> MutexGuard<'_, HashSet<M>> {
        // A poisoned set is still valid: the only mutation is a single insert.
        self.confirmed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delivers messages to an ordered list of faillible backends.
///
/// Meant to be shared behind an `Arc`; `send` may be called concurrently for
/// different (or identical) messages.
pub struct ResilientPublisher<M> {
    id: PublisherId,
    backends: Vec<Backend<M>>,
    config: PublisherConfig,
}

impl<M: Message> ResilientPublisher<M> {
    /// Create a publisher over `backends`, driven in the given order.
    pub fn new(backends: Vec<Arc<dyn Storage<M>>>, config: PublisherConfig) -> Self {
        let id = PublisherId::new();
        tracing::debug!(
            publisher = %id,
            backends = backends.len(),
            order = ?config.confirm_order,
            "publisher created"
        );
        Self {
            id,
            backends: backends.into_iter().map(Backend::new).collect(),
            config,
        }
    }

    /// Create a publisher over exactly two backends.
    pub fn pair(
        first: Arc<dyn Storage<M>>,
        second: Arc<dyn Storage<M>>,
        config: PublisherConfig,
    ) -> Self {
        Self::new(vec![first, second], config)
    }

    pub fn id(&self) -> &PublisherId {
        &self.id
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Deliver `message` to every backend.
    ///
    /// Completes once each backend was observed holding the message, by this
    /// call or an earlier one. Dropped writes are retried until the attempt
    /// budget or deadline in the config runs out.
    pub async fn send(&self, message: M) -> Result<(), TransatError> {
        self.deliver(&message, None).await
    }

    /// Like [`send`](Self::send), but gives up with
    /// [`TransatError::Cancelled`] once `cancel` fires.
    ///
    /// Backends confirmed before cancellation stay confirmed.
    pub async fn send_with_cancel(
        &self,
        message: M,
        cancel: &CancellationToken,
    ) -> Result<(), TransatError> {
        self.deliver(&message, Some(cancel)).await
    }

    /// Whether `message` is confirmed in every backend.
    pub fn is_confirmed(&self, message: &M) -> bool {
        self.backends.iter().all(|b| b.is_confirmed(message))
    }

    /// Whether `message` is confirmed in the backend at `index`.
    pub fn confirmed_in(&self, index: usize, message: &M) -> bool {
        self.backends
            .get(index)
            .is_some_and(|b| b.is_confirmed(message))
    }

    /// Per-backend metrics, in registration order.
    pub fn metrics(&self) -> Vec<BackendSnapshot> {
        self.backends
            .iter()
            .map(|b| b.metrics.snapshot(b.name()))
            .collect()
    }

    // ── Internal ───────────────────────────────────────────────────────

    async fn deliver(
        &self,
        message: &M,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), TransatError> {
        match self.config.confirm_order {
            ConfirmOrder::Sequential => {
                for backend in &self.backends {
                    self.confirm_backend(backend, message, cancel).await?;
                }
            }
            ConfirmOrder::Concurrent => {
                futures::future::try_join_all(
                    self.backends
                        .iter()
                        .map(|backend| self.confirm_backend(backend, message, cancel)),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Confirm `message` in one backend, within the configured deadline.
    async fn confirm_backend(
        &self,
        backend: &Backend<M>,
        message: &M,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), TransatError> {
        if backend.is_confirmed(message) {
            backend.metrics.memo_hits.inc();
            tracing::debug!(backend = backend.name(), ?message, "already confirmed");
            return Ok(());
        }

        let started = Instant::now();
        let mut attempts: u32 = 0;

        let Some(expires) = self.config.deadline.and_then(|d| started.checked_add(d)) else {
            return self.retry_loop(backend, message, cancel, &mut attempts).await;
        };

        // The deadline also bounds an in-flight store/holds and the retry sleep.
        let outcome = tokio::time::timeout_at(
            expires,
            self.retry_loop(backend, message, cancel, &mut attempts),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(backend, message, attempts, started.elapsed())),
        }
    }

    /// Write-then-read loop against a single backend.
    ///
    /// `attempts` is shared with the caller so a deadline that fires mid-loop
    /// still reports how many writes were issued.
    async fn retry_loop(
        &self,
        backend: &Backend<M>,
        message: &M,
        cancel: Option<&CancellationToken>,
        attempts: &mut u32,
    ) -> Result<(), TransatError> {
        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(self.cancelled(backend, message, *attempts));
            }
            if let Some(limit) = self.config.max_attempts {
                if *attempts >= limit {
                    tracing::warn!(
                        backend = backend.name(),
                        ?message,
                        attempts = *attempts,
                        "attempt budget exhausted"
                    );
                    return Err(TransatError::DeliveryFailed {
                        backend: backend.name().to_string(),
                        attempts: *attempts,
                    });
                }
            }

            *attempts += 1;
            backend.metrics.store_attempts.inc();
            backend.storage.store(&self.id, message).await;

            let held = match backend.storage.holds(message).await {
                Ok(held) => held,
                Err(source) => {
                    tracing::error!(backend = backend.name(), ?message, "read failed: {source}");
                    return Err(TransatError::Backend {
                        backend: backend.name().to_string(),
                        source,
                    });
                }
            };

            if held {
                if backend.confirm(message.clone()) {
                    backend.metrics.confirmations.inc();
                }
                tracing::debug!(
                    backend = backend.name(),
                    ?message,
                    attempts = *attempts,
                    "confirmed"
                );
                return Ok(());
            }

            backend.metrics.record_drop(now_ms());
            tracing::trace!(
                backend = backend.name(),
                ?message,
                attempts = *attempts,
                "write not held, retrying"
            );

            let pause = tokio::time::sleep(self.config.retry_interval);
            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => {
                        return Err(self.cancelled(backend, message, *attempts));
                    }
                    _ = pause => {}
                },
                None => pause.await,
            }
        }
    }

    fn timed_out(
        &self,
        backend: &Backend<M>,
        message: &M,
        attempts: u32,
        elapsed: Duration,
    ) -> TransatError {
        tracing::warn!(
            backend = backend.name(),
            ?message,
            attempts,
            ?elapsed,
            "delivery deadline exceeded"
        );
        TransatError::DeliveryTimeout {
            backend: backend.name().to_string(),
            elapsed,
            attempts,
        }
    }

    fn cancelled(&self, backend: &Backend<M>, message: &M, attempts: u32) -> TransatError {
        tracing::warn!(backend = backend.name(), ?message, attempts, "delivery cancelled");
        TransatError::Cancelled {
            backend: backend.name().to_string(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{FaillibleStorage, FailurePlan};

    type Shared = Arc<FaillibleStorage<u32>>;

    fn backend(name: &str, plan: FailurePlan) -> Shared {
        Arc::new(FaillibleStorage::new(name, plan))
    }

    fn publisher(a: &Shared, b: &Shared, config: PublisherConfig) -> ResilientPublisher<u32> {
        ResilientPublisher::pair(a.clone(), b.clone(), config)
    }

    /// Backend whose reads always fail.
    struct BrokenReads;

    #[async_trait::async_trait]
    impl Storage<u32> for BrokenReads {
        fn name(&self) -> &str {
            "broken"
        }

        async fn store(&self, _publisher: &PublisherId, _message: &u32) {}

        async fn holds(&self, _message: &u32) -> Result<bool, StorageError> {
            Err(StorageError::Unavailable("disk gone".into()))
        }
    }

    /// Backend whose writes never complete.
    struct HangingStore;

    #[async_trait::async_trait]
    impl Storage<u32> for HangingStore {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn store(&self, _publisher: &PublisherId, _message: &u32) {
            std::future::pending::<()>().await
        }

        async fn holds(&self, _message: &u32) -> Result<bool, StorageError> {
            Ok(false)
        }
    }

    /// Backend that records whether its sibling held the message at store time.
    struct OrderWatcher {
        sibling: Shared,
        inner: FaillibleStorage<u32>,
        saw_unconfirmed_sibling: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl Storage<u32> for OrderWatcher {
        fn name(&self) -> &str {
            "watcher"
        }

        async fn store(&self, publisher: &PublisherId, message: &u32) {
            if !self.sibling.values().contains(message) {
                *self.saw_unconfirmed_sibling.lock().unwrap() = true;
            }
            self.inner.store(publisher, message).await;
        }

        async fn holds(&self, message: &u32) -> Result<bool, StorageError> {
            self.inner.holds(message).await
        }
    }

    #[tokio::test]
    async fn healthy_backends_confirm_on_first_attempt() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::Never);
        let p = publisher(&a, &b, PublisherConfig::new());

        p.send(1).await.unwrap();

        assert_eq!(a.store_calls(), 1);
        assert_eq!(b.store_calls(), 1);
        assert!(p.is_confirmed(&1));
        assert!(p.confirmed_in(0, &1));
        assert!(p.confirmed_in(1, &1));
        assert!(!p.confirmed_in(2, &1));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_writes_are_retried() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::DropFirst(3));
        let p = publisher(&a, &b, PublisherConfig::new());

        p.send(42).await.unwrap();

        assert_eq!(a.store_calls(), 1);
        assert_eq!(b.store_calls(), 4);
        assert_eq!(a.values(), HashSet::from([42]));
        assert_eq!(b.values(), HashSet::from([42]));

        let metrics = p.metrics();
        assert_eq!(metrics[1].backend, "b");
        assert_eq!(metrics[1].store_attempts, 4);
        assert_eq!(metrics[1].dropped_writes, 3);
        assert_eq!(metrics[1].confirmations, 1);
        assert!(metrics[1].last_failure_ms.is_some());
        assert_eq!(metrics[0].dropped_writes, 0);
        assert!(metrics[0].last_failure_ms.is_none());
    }

    #[tokio::test]
    async fn resend_short_circuits() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::Never);
        let p = publisher(&a, &b, PublisherConfig::new());

        p.send(1).await.unwrap();
        p.send(1).await.unwrap();

        assert_eq!(a.store_calls(), 1);
        assert_eq!(b.store_calls(), 1);
        assert_eq!(a.holds_calls(), 1);
        assert_eq!(b.holds_calls(), 1);
        assert!(p.metrics().iter().all(|m| m.memo_hits == 1));
    }

    #[tokio::test]
    async fn no_backends_is_trivially_confirmed() {
        let p: ResilientPublisher<u32> = ResilientPublisher::new(vec![], PublisherConfig::new());
        p.send(5).await.unwrap();
        assert_eq!(p.backend_count(), 0);
        assert!(p.is_confirmed(&5));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_is_reported() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::Always);
        let p = publisher(&a, &b, PublisherConfig::new().max_attempts(5));

        let err = p.send(1).await.unwrap_err();

        assert!(matches!(
            &err,
            TransatError::DeliveryFailed { backend, attempts: 5 } if backend == "b"
        ));
        assert_eq!(b.store_calls(), 5);
        // The backend that did confirm keeps its confirmation.
        assert!(p.confirmed_in(0, &1));
        assert!(!p.is_confirmed(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_reported() {
        let a = backend("a", FailurePlan::Always);
        let b = backend("b", FailurePlan::Never);
        let config = PublisherConfig::new()
            .unbounded()
            .retry_interval(Duration::from_millis(10))
            .deadline(Duration::from_millis(50));
        let p = publisher(&a, &b, config);

        let err = p.send(1).await.unwrap_err();

        let TransatError::DeliveryTimeout { backend, elapsed, .. } = err else {
            panic!("expected DeliveryTimeout");
        };
        assert_eq!(backend, "a");
        assert!(elapsed >= Duration::from_millis(50));
        // Sequential: the second backend was never reached.
        assert_eq!(b.store_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_a_write_that_never_returns() {
        let a: Arc<dyn Storage<u32>> = Arc::new(HangingStore);
        let b = backend("b", FailurePlan::Never);
        let config = PublisherConfig::new().deadline(Duration::from_millis(50));
        let p = ResilientPublisher::pair(a, b.clone(), config);

        let err = tokio::time::timeout(Duration::from_secs(3600), p.send(1))
            .await
            .expect("send must not outlive its deadline")
            .unwrap_err();

        let TransatError::DeliveryTimeout { backend, elapsed, attempts } = err else {
            panic!("expected DeliveryTimeout");
        };
        assert_eq!(backend, "hanging");
        assert_eq!(attempts, 1);
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
        assert_eq!(b.store_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_the_retry_sleep_short() {
        let a = backend("a", FailurePlan::Always);
        let b = backend("b", FailurePlan::Never);
        let config = PublisherConfig::new()
            .retry_interval(Duration::from_secs(10))
            .deadline(Duration::from_millis(50));
        let p = publisher(&a, &b, config);

        let started = Instant::now();
        let err = p.send(1).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        let TransatError::DeliveryTimeout { elapsed, attempts, .. } = err else {
            panic!("expected DeliveryTimeout");
        };
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
        assert_eq!(attempts, 1);
        assert_eq!(a.store_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_no_io() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::Never);
        let p = publisher(&a, &b, PublisherConfig::new());
        let token = CancellationToken::new();
        token.cancel();

        let err = p.send_with_cancel(1, &token).await.unwrap_err();

        assert!(matches!(err, TransatError::Cancelled { attempts: 0, .. }));
        assert_eq!(a.store_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_unbounded_retry() {
        let a = backend("a", FailurePlan::Always);
        let b = backend("b", FailurePlan::Never);
        let p = Arc::new(publisher(&a, &b, PublisherConfig::new().unbounded()));
        let token = CancellationToken::new();

        let task = {
            let p = Arc::clone(&p);
            let token = token.clone();
            tokio::spawn(async move { p.send_with_cancel(7, &token).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, TransatError::Cancelled { ref backend, .. } if backend == "a"));
        assert!(a.store_calls() > 1);
        assert_eq!(b.store_calls(), 0);
    }

    #[tokio::test]
    async fn read_failure_is_fatal() {
        let a: Arc<dyn Storage<u32>> = Arc::new(BrokenReads);
        let b = backend("b", FailurePlan::Never);
        let p = ResilientPublisher::pair(a, b.clone(), PublisherConfig::new().unbounded());

        let err = p.send(3).await.unwrap_err();

        assert!(matches!(err, TransatError::Backend { ref backend, .. } if backend == "broken"));
        assert_eq!(p.metrics()[0].store_attempts, 1);
        assert_eq!(b.store_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_order_confirms_first_backend_first() {
        let a = backend("a", FailurePlan::DropFirst(4));
        let watcher = Arc::new(OrderWatcher {
            sibling: a.clone(),
            inner: FaillibleStorage::new("inner", FailurePlan::Never),
            saw_unconfirmed_sibling: Mutex::new(false),
        });
        let p: ResilientPublisher<u32> =
            ResilientPublisher::pair(a.clone(), watcher.clone(), PublisherConfig::new());

        for m in 0..5 {
            p.send(m).await.unwrap();
        }

        assert!(!*watcher.saw_unconfirmed_sibling.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_order_still_confirms_everywhere() {
        let a = backend("a", FailurePlan::DropFirst(5));
        let b = backend("b", FailurePlan::DropFirst(2));
        let config = PublisherConfig::new().confirm_order(ConfirmOrder::Concurrent);
        let p = publisher(&a, &b, config);

        p.send(11).await.unwrap();

        assert_eq!(a.store_calls(), 6);
        assert_eq!(b.store_calls(), 3);
        assert!(p.is_confirmed(&11));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_order_surfaces_first_error() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::Always);
        let config = PublisherConfig::new()
            .confirm_order(ConfirmOrder::Concurrent)
            .max_attempts(3);
        let p = publisher(&a, &b, config);

        let err = p.send(1).await.unwrap_err();
        assert_eq!(err.backend(), Some("b"));
        assert!(p.confirmed_in(0, &1));
    }

    #[tokio::test]
    async fn publishers_are_independent() {
        let a = backend("a", FailurePlan::Never);
        let b = backend("b", FailurePlan::Never);
        let p1 = publisher(&a, &b, PublisherConfig::new());
        let p2 = publisher(&a, &b, PublisherConfig::new());

        p1.send(1).await.unwrap();
        assert!(!p2.is_confirmed(&1));
        assert_ne!(p1.id(), p2.id());

        // p2 has its own memo, so it still checks the backends once.
        p2.send(1).await.unwrap();
        assert_eq!(a.store_calls(), 2);
        assert_eq!(a.writes_from(p1.id()), 1);
        assert_eq!(a.writes_from(p2.id()), 1);
    }

    #[tokio::test]
    async fn works_with_string_messages() {
        let a: Arc<FaillibleStorage<String>> =
            Arc::new(FaillibleStorage::new("a", FailurePlan::DropFirst(1)));
        let shared: Arc<dyn Storage<String>> = a.clone();
        let p = ResilientPublisher::new(vec![shared], PublisherConfig::new());

        p.send("hello".to_string()).await.unwrap();
        assert!(a.values().contains("hello"));
    }
}
