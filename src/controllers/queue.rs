//! Keyed work queue with single-flight processing and retry
//!
//! Watch events are reduced to an [`ObjectKey`] and enqueued. A key is never
//! processed by two workers at once: events arriving while it is in flight
//! mark it dirty and it runs once more afterwards, however many events came
//! in. Transient failures are retried with exponential backoff and jitter up
//! to [`RetryPolicy::max_attempts`]; permanent failures are dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Identity of a reconciled object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object; None for objects without name or namespace
    pub fn for_object<K: Resource<DynamicType = ()>>(obj: &K) -> Option<Self> {
        let name = obj.meta().name.clone()?;
        let namespace = obj.namespace()?;
        Some(Self::new(K::kind(&()), namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Retry policy for transient reconcile failures
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts per key (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the un-jittered delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the `attempt`-th consecutive failure (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with 0.5x to 1.5x jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(self.base_delay(attempt).as_secs_f64() * jitter)
    }

    /// Whether a failure on the `attempt`-th try is retried
    pub fn should_retry(&self, attempt: u32, error: &Error) -> bool {
        !error.is_permanent() && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

/// Deduplicating queue of keys awaiting reconciliation
#[derive(Clone)]
pub struct WorkQueue {
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl WorkQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            tx,
        };
        (queue, rx)
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // The state holds plain sets; a panic while locked cannot leave them inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request a reconciliation of `key`
    pub fn enqueue(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) && self.tx.send(key).is_err() {
            debug!("Work queue closed, dropping key");
        }
    }

    /// Request a reconciliation of `key` after `delay`
    pub fn enqueue_after(&self, key: ObjectKey, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Number of keys waiting or running
    pub fn len(&self) -> usize {
        let state = self.state();
        state.queued.len() + state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.queued.remove(key);
        state.in_flight.insert(key.clone());
    }

    fn complete(&self, key: &ObjectKey, result: Result<()>, policy: &RetryPolicy) {
        let (attempt, rerun) = {
            let mut state = self.state();
            state.in_flight.remove(key);
            let rerun = state.dirty.remove(key);
            let attempt = match &result {
                Ok(()) => {
                    state.failures.remove(key);
                    0
                }
                Err(_) => {
                    let failures = state.failures.entry(key.clone()).or_insert(0);
                    *failures += 1;
                    *failures
                }
            };
            (attempt, rerun)
        };

        match result {
            Ok(()) => debug!(key = %key, "Reconciled"),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.delay(attempt);
                warn!(
                    key = %key,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Reconciliation failed, retrying"
                );
                if !rerun {
                    self.enqueue_after(key.clone(), delay);
                }
            }
            Err(e) => {
                error!(
                    key = %key,
                    attempt = attempt,
                    permanent = e.is_permanent(),
                    error = %e,
                    "Reconciliation failed, not retrying"
                );
                self.state().failures.remove(key);
            }
        }

        if rerun {
            self.enqueue(key.clone());
        }
    }
}

/// Feed a watcher event into the queue
pub fn enqueue_event<K>(queue: &WorkQueue, event: watcher::Event<K>)
where
    K: Resource<DynamicType = ()>,
{
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) | watcher::Event::Delete(obj) => {
            if let Some(key) = ObjectKey::for_object(&obj) {
                queue.enqueue(key);
            }
        }
        watcher::Event::Init | watcher::Event::InitDone => {}
    }
}

/// Drain the queue with at most `workers` concurrent handlers until shutdown
pub async fn process<F, Fut>(
    queue: WorkQueue,
    mut rx: mpsc::UnboundedReceiver<ObjectKey>,
    workers: usize,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    handler: F,
) where
    F: Fn(ObjectKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let handler = Arc::new(handler);
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    loop {
        let key = tokio::select! {
            _ = shutdown.cancelled() => break,
            key = rx.recv() => match key {
                Some(key) => key,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        queue.start(&key);
        let queue = queue.clone();
        let handler = handler.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let result = handler(key.clone()).await;
            queue.complete(&key, result, &policy);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("SimpleMySql", "apps", name)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    fn spawn_processor<F, Fut>(
        policy: RetryPolicy,
        handler: F,
    ) -> (WorkQueue, CancellationToken)
    where
        F: Fn(ObjectKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (queue, rx) = WorkQueue::new();
        let shutdown = CancellationToken::new();
        tokio::spawn(process(queue.clone(), rx, 4, policy, shutdown.clone(), handler));
        (queue, shutdown)
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(4), Duration::from_secs(8));
        assert_eq!(policy.base_delay(30), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay(3);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn permanent_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(1, &Error::validation("missing bucket")));
        assert!(policy.should_retry(1, &Error::config("transient")));
        assert!(!policy.should_retry(5, &Error::config("transient")));
        assert!(RetryPolicy { max_attempts: 0, ..policy }.should_retry(1000, &Error::config("x")));
    }

    #[test]
    fn keys_display_kind_namespace_and_name() {
        assert_eq!(key("shop").to_string(), "SimpleMySql/apps/shop");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_duplicates_coalesce() {
        let (queue, mut rx) = WorkQueue::new();
        queue.enqueue(key("shop"));
        queue.enqueue(key("shop"));
        queue.enqueue(key("other"));

        assert_eq!(rx.recv().await, Some(key("shop")));
        assert_eq!(rx.recv().await, Some(key("other")));
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn events_during_flight_rerun_once_without_overlap() {
        let calls = Arc::new(AtomicU32::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let (c, a, o) = (calls.clone(), active.clone(), overlapped.clone());
        let (queue, shutdown) = spawn_processor(fast_policy(3), move |_key| {
            let (c, a, o) = (c.clone(), a.clone(), o.clone());
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        queue.enqueue(key("shop"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Three events while the first run is in flight
        queue.enqueue(key("shop"));
        queue.enqueue(key("shop"));
        queue.enqueue(key("shop"));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_up_to_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let (queue, shutdown) = spawn_processor(fast_policy(3), move |_key| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::config("api server unavailable"))
            }
        });

        queue.enqueue(key("shop"));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let (queue, shutdown) = spawn_processor(fast_policy(5), move |_key| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::config("conflict"))
                } else {
                    Ok(())
                }
            }
        });

        queue.enqueue(key("shop"));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_run_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let (queue, shutdown) = spawn_processor(fast_policy(5), move |_key| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("s3 is required"))
            }
        });

        queue.enqueue(key("nightly"));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_concurrently() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let (queue, shutdown) = spawn_processor(fast_policy(1), move |_key| {
            let (a, p) = (a.clone(), p.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        queue.enqueue(key("a"));
        queue.enqueue(key("b"));
        queue.enqueue(key("c"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        shutdown.cancel();
    }
}
