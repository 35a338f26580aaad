//! Parked (delayed) config requests.
//!
//! # Model
//!
//! Requests that cannot be answered yet are parked per application. A parked
//! request holds no worker; it costs a queue slot plus one watch task that
//! waits for either its expiry timer or the client's disconnect token.
//!
//! Every parked request leaves its queue exactly once, through one of:
//!
//! ```text
//!            ┌──────────► Expired       timer fired, resubmitted for a forced answer
//!            │
//! Parked ────┼──────────► Drained       activation, returned by drain_all
//!            │
//!            ├──────────► Disconnected  client went away, discarded without a response
//!            │
//!            └──────────► Cancelled     removed through cancel()
//! ```
//!
//! The transitions race with each other (the timer fires on one thread while
//! an activation drains on another). Each [`ParkedRequest`] carries an atomic
//! state; whichever path moves it out of `Parked` first owns the request, the
//! others become no-ops.
//!
//! An application with no parked requests has no queue at all.

use crate::metrics_defs::{PARKED_EXPIRED, PARKED_REQUESTS, REQUESTS_DISCONNECTED};
use crate::request::ConfigRequest;
use crate::types::ApplicationId;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParkState {
    Parked = 0,
    Expired = 1,
    Drained = 2,
    Disconnected = 3,
    Cancelled = 4,
}

impl ParkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ParkState::Expired,
            2 => ParkState::Drained,
            3 => ParkState::Disconnected,
            4 => ParkState::Cancelled,
            _ => ParkState::Parked,
        }
    }
}

/// A request whose parked timer ran out. It must be given a forced answer.
#[derive(Debug)]
pub struct ExpiredRequest {
    pub application: ApplicationId,
    pub request: ConfigRequest,
}

/// Identifies one parked request, returned by [`DelayedResponseRegistry::park`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParkedHandle {
    pub application: ApplicationId,
    pub id: u64,
}

/// Queue entry wrapping a parked request.
pub struct ParkedRequest {
    id: u64,
    application: ApplicationId,
    parked_at: Instant,
    state: AtomicU8,
    request: Mutex<Option<ConfigRequest>>,
    // Task waiting on the expiry timer and the disconnect token
    watch: Mutex<Option<AbortHandle>>,
}

impl ParkedRequest {
    fn new(id: u64, application: ApplicationId, request: ConfigRequest) -> Self {
        ParkedRequest {
            id,
            application,
            parked_at: Instant::now(),
            state: AtomicU8::new(ParkState::Parked as u8),
            request: Mutex::new(Some(request)),
            watch: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }

    pub fn state(&self) -> ParkState {
        ParkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn parked_for(&self) -> Duration {
        self.parked_at.elapsed()
    }

    fn arm(&self, handle: AbortHandle) {
        let mut watch = self.watch.lock();
        if self.state() == ParkState::Parked {
            *watch = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Moves the request out of `Parked`. Only the first caller gets the
    /// request back. `abort_watch` is false when called from the watch task
    /// itself.
    fn claim(&self, to: ParkState, abort_watch: bool) -> Option<ConfigRequest> {
        self.state
            .compare_exchange(
                ParkState::Parked as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        if let Some(handle) = self.watch.lock().take()
            && abort_watch
        {
            handle.abort();
        }
        self.request.lock().take()
    }
}

struct RegistryInner {
    queues: DashMap<ApplicationId, HashMap<u64, Arc<ParkedRequest>>>,
    next_id: AtomicU64,
    total: AtomicUsize,
    expired_tx: mpsc::UnboundedSender<ExpiredRequest>,
}

impl RegistryInner {
    /// Removes one entry from its queue, dropping the queue once it is empty.
    fn remove_entry(&self, application: &ApplicationId, id: u64) -> bool {
        let remaining = match self.queues.get_mut(application) {
            Some(mut queue) => queue.remove(&id).map(|_| queue.len()),
            None => None,
        };

        let Some(remaining) = remaining else {
            return false;
        };

        self.total.fetch_sub(1, Ordering::AcqRel);
        if remaining == 0 {
            self.queues.remove_if(application, |_, queue| queue.is_empty());
        }
        record_depth(application, remaining);
        true
    }

    fn expire(&self, parked: &ParkedRequest) {
        self.remove_entry(&parked.application, parked.id);
        let Some(request) = parked.claim(ParkState::Expired, false) else {
            return;
        };

        counter!(PARKED_EXPIRED).increment(1);
        tracing::debug!(
            application = %parked.application,
            key = %request.key(),
            parked_ms = parked.parked_for().as_millis() as u64,
            "Parked request expired"
        );

        let expired = ExpiredRequest {
            application: parked.application.clone(),
            request,
        };
        if let Err(mpsc::error::SendError(expired)) = self.expired_tx.send(expired) {
            tracing::warn!(
                application = %expired.application,
                "Expired request could not be resubmitted, server is shutting down"
            );
            expired.request.respond(Err(crate::errors::ResolveError::Internal(
                "server is shutting down".into(),
            )));
        }
    }

    fn disconnect(&self, parked: &ParkedRequest) {
        self.remove_entry(&parked.application, parked.id);
        if let Some(request) = parked.claim(ParkState::Disconnected, false) {
            counter!(REQUESTS_DISCONNECTED).increment(1);
            tracing::debug!(
                application = %parked.application,
                key = %request.key(),
                "Client disconnected while parked, discarding request"
            );
        }
    }
}

/// Per-application collection of parked requests.
///
/// Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct DelayedResponseRegistry {
    inner: Arc<RegistryInner>,
}

impl DelayedResponseRegistry {
    /// Creates a registry. Requests whose timer expires are sent on the
    /// returned channel and must be answered by the receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExpiredRequest>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let registry = DelayedResponseRegistry {
            inner: Arc::new(RegistryInner {
                queues: DashMap::new(),
                next_id: AtomicU64::new(1),
                total: AtomicUsize::new(0),
                expired_tx,
            }),
        };
        (registry, expired_rx)
    }

    /// Parks `request` under `application` for at most `timeout`.
    ///
    /// Must be called from within a tokio runtime; the expiry timer and the
    /// disconnect watch run as one spawned task.
    pub fn park(
        &self,
        mut request: ConfigRequest,
        application: ApplicationId,
        timeout: Duration,
    ) -> ParkedHandle {
        request.mark_parked();
        let token = request.disconnect_token().clone();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let parked = Arc::new(ParkedRequest::new(id, application.clone(), request));

        // Counted before it becomes visible to a drain, which subtracts it
        self.inner.total.fetch_add(1, Ordering::AcqRel);
        let depth = {
            let mut queue = self.inner.queues.entry(application.clone()).or_default();
            queue.insert(id, parked.clone());
            queue.len()
        };
        record_depth(&application, depth);

        let inner = self.inner.clone();
        let watched = parked.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => inner.expire(&watched),
                _ = token.cancelled() => inner.disconnect(&watched),
            }
        });
        parked.arm(task.abort_handle());

        ParkedHandle { application, id }
    }

    /// Removes and returns every request currently parked for `application`,
    /// cancelling their timers and disconnect watches.
    ///
    /// Requests parked while the drain runs are not included. A request whose
    /// timer fires concurrently is delivered by exactly one of the two paths.
    pub fn drain_all(&self, application: &ApplicationId) -> Vec<ConfigRequest> {
        let Some((_, queue)) = self.inner.queues.remove(application) else {
            return Vec::new();
        };

        self.inner.total.fetch_sub(queue.len(), Ordering::AcqRel);
        record_depth(application, 0);

        queue
            .into_values()
            .filter_map(|parked| parked.claim(ParkState::Drained, true))
            .collect()
    }

    /// Drains every application. Used at shutdown.
    pub fn drain_everything(&self) -> Vec<(ApplicationId, ConfigRequest)> {
        self.applications()
            .into_iter()
            .flat_map(|application| {
                self.drain_all(&application)
                    .into_iter()
                    .map(move |request| (application.clone(), request))
            })
            .collect()
    }

    /// Removes a single parked request. Returns it if this call won the race
    /// against its timer, a drain, or a disconnect.
    pub fn cancel(&self, handle: &ParkedHandle) -> Option<ConfigRequest> {
        let parked = self
            .inner
            .queues
            .get(&handle.application)
            .and_then(|queue| queue.get(&handle.id).cloned())?;

        self.inner.remove_entry(&handle.application, handle.id);
        parked.claim(ParkState::Cancelled, true)
    }

    pub fn size(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    pub fn size_for(&self, application: &ApplicationId) -> usize {
        self.inner
            .queues
            .get(application)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    pub fn applications(&self) -> Vec<ApplicationId> {
        self.inner
            .queues
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn has_queue(&self, application: &ApplicationId) -> bool {
        self.inner.queues.contains_key(application)
    }
}

fn record_depth(application: &ApplicationId, depth: usize) {
    gauge!(PARKED_REQUESTS, "application" => application.to_string()).set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ClientChecksums;
    use crate::errors::ResolveError;
    use crate::request::{RequestParams, ResponseResult};
    use crate::types::ConfigKey;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn app(name: &str) -> ApplicationId {
        ApplicationId::new("tenant", name, "default")
    }

    fn request() -> (
        ConfigRequest,
        oneshot::Receiver<ResponseResult>,
        CancellationToken,
    ) {
        ConfigRequest::with_channel(RequestParams {
            key: ConfigKey::new("cloud.config", "sentinel", "node1"),
            client_hostname: "node1".into(),
            version: None,
            checksums: ClientChecksums::none(),
            generation: 1,
            timeout: Duration::from_secs(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_park_and_drain() {
        let (registry, _expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");
        let app2 = app("app2");

        let (r1, _rx1, _t1) = request();
        let (r2, _rx2, _t2) = request();
        let (r3, _rx3, _t3) = request();
        registry.park(r1, app1.clone(), Duration::from_secs(30));
        registry.park(r2, app1.clone(), Duration::from_secs(30));
        registry.park(r3, app2.clone(), Duration::from_secs(30));

        assert_eq!(registry.size(), 3);
        assert_eq!(registry.size_for(&app1), 2);
        assert_eq!(registry.size_for(&app2), 1);

        let drained = registry.drain_all(&app1);
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|r| r.parked_once()));
        assert_eq!(registry.size_for(&app1), 0);
        assert!(!registry.has_queue(&app1));
        assert_eq!(registry.size(), 1);

        // Draining again yields nothing
        assert!(registry.drain_all(&app1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let (registry, mut expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");

        let (r, _rx, _t) = request();
        registry.park(r, app1.clone(), Duration::from_millis(50));

        let start = Instant::now();
        let expired = expired_rx.recv().await.unwrap();
        assert_eq!(expired.application, app1);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(registry.size(), 0);
        assert!(!registry.has_queue(&app1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_cancels_timer() {
        let (registry, mut expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");

        let (r, _rx, _t) = request();
        registry.park(r, app1.clone(), Duration::from_millis(50));
        assert_eq!(registry.drain_all(&app1).len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(expired_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_discards() {
        let (registry, mut expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");

        let (r, rx, token) = request();
        registry.park(r, app1.clone(), Duration::from_millis(50));
        token.cancel();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(registry.size_for(&app1), 0);
        assert!(registry.drain_all(&app1).is_empty());

        // No response is sent, the responder is simply dropped
        assert!(rx.await.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(expired_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (registry, _expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");

        let (r, _rx, _t) = request();
        let handle = registry.park(r, app1.clone(), Duration::from_secs(30));

        let cancelled = registry.cancel(&handle);
        assert!(cancelled.is_some());
        assert!(registry.cancel(&handle).is_none());
        assert_eq!(registry.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_after_shutdown_gets_error() {
        let (registry, expired_rx) = DelayedResponseRegistry::new();
        drop(expired_rx);

        let (r, rx, _t) = request();
        registry.park(r, app("app1"), Duration::from_millis(10));

        assert!(matches!(rx.await.unwrap(), Err(ResolveError::Internal(_))));
    }

    #[test]
    fn test_claim_is_single_entry() {
        let (r, _rx, _t) = request();
        let parked = ParkedRequest::new(1, app("app1"), r);

        assert!(parked.claim(ParkState::Drained, true).is_some());
        assert!(parked.claim(ParkState::Expired, false).is_none());
        assert!(parked.claim(ParkState::Disconnected, false).is_none());
        assert_eq!(parked.state(), ParkState::Drained);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_expiry_and_drain_deliver_once() {
        let (registry, mut expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");
        let count = 200;

        let mut receivers = Vec::new();
        for i in 0..count {
            let (r, rx, _t) = request();
            receivers.push(rx);
            // Spread timers around the moment of the drain
            registry.park(r, app1.clone(), Duration::from_micros(500 + (i % 10) * 100));
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        let drained = registry.drain_all(&app1).len();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut expired = 0;
        while expired_rx.try_recv().is_ok() {
            expired += 1;
        }

        assert_eq!(drained + expired, count as usize);
        assert_eq!(registry.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_size_stays_consistent_while_parking_and_draining() {
        let (registry, _expired_rx) = DelayedResponseRegistry::new();
        let app1 = app("app1");
        let per_task = 2000;

        let parkers: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let app1 = app1.clone();
                tokio::spawn(async move {
                    for _ in 0..per_task {
                        let (r, _rx, _t) = request();
                        registry.park(r, app1.clone(), Duration::from_secs(60));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while parkers.iter().any(|task| !task.is_finished()) {
            drained += registry.drain_all(&app1).len();
            assert!(registry.size() <= 2 * per_task);
            tokio::task::yield_now().await;
        }
        for task in parkers {
            task.await.unwrap();
        }
        drained += registry.drain_all(&app1).len();

        assert_eq!(drained, 2 * per_task);
        assert_eq!(registry.size(), 0);
    }
}
