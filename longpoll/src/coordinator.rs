//! Entry point for config requests and activation events.
//!
//! Requests are resolved on a fixed pool of worker tasks. A request that
//! cannot be answered yet is parked in the [`DelayedResponseRegistry`] and
//! handed back to the pool when its application activates a new generation,
//! when the application is removed, or when its timeout runs out.

use crate::errors::ResolveError;
use crate::generations::ApplicationGenerations;
use crate::metrics_defs::{
    ACTIVATIONS, PARKED_AGAIN, REQUESTS_DISCONNECTED, REQUESTS_RECEIVED, REQUESTS_REJECTED,
    RESOLVE_DURATION, RESPONSES, WORKER_BACKLOG,
};
use crate::registry::{DelayedResponseRegistry, ExpiredRequest};
use crate::request::{ConfigRequest, ResponseResult};
use crate::resolver::{RequestResolver, ResolveMode, Resolution};
use crate::types::{ApplicationId, Generation};
use crate::worker_pool::{JobHandler, SubmitError, WorkerPool};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatorSettings {
    pub workers: usize,
    pub queue_size: usize,
    /// Upper bound applied to the timeout a client asks for.
    pub max_timeout: Duration,
}

struct Job {
    request: ConfigRequest,
    mode: ResolveMode,
}

/// Runs on the worker tasks: resolves one request and either answers or
/// parks it.
struct ResolveHandler {
    resolver: RequestResolver,
    registry: DelayedResponseRegistry,
    stopping: Arc<AtomicBool>,
}

#[async_trait]
impl JobHandler<Job> for ResolveHandler {
    async fn handle(&self, job: Job) {
        let Job { request, mut mode } = job;
        if request.is_disconnected() {
            discard(&request);
            return;
        }

        // Nothing parks once shutdown began
        if self.stopping.load(Ordering::Acquire) {
            mode = ResolveMode::Forced;
        }

        let start = Instant::now();
        let resolution = self.resolver.resolve(request.params(), mode).await;
        histogram!(RESOLVE_DURATION).record(start.elapsed().as_secs_f64());

        match resolution {
            Resolution::Answer(result) => respond(request, result),
            Resolution::Park { application } => {
                if request.is_disconnected() {
                    discard(&request);
                    return;
                }
                if request.parked_once() {
                    counter!(PARKED_AGAIN).increment(1);
                    tracing::debug!(
                        %application,
                        key = %request.key(),
                        "Woken request is still current, parking it again"
                    );
                }
                let timeout = request.params().timeout;
                self.registry.park(request, application, timeout);
            }
        }
    }
}

pub struct RequestCoordinator {
    handler: Arc<ResolveHandler>,
    pool: Arc<WorkerPool<Job>>,
    registry: DelayedResponseRegistry,
    generations: Arc<ApplicationGenerations>,
    max_timeout: Duration,
    stopping: Arc<AtomicBool>,
    expiry_stop: CancellationToken,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl RequestCoordinator {
    /// Starts the worker pool and the loop answering expired requests.
    /// `generations` must be the state the resolver reads.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        resolver: RequestResolver,
        generations: Arc<ApplicationGenerations>,
        settings: CoordinatorSettings,
    ) -> Self {
        let (registry, expired_rx) = DelayedResponseRegistry::new();
        let stopping = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(ResolveHandler {
            resolver,
            registry: registry.clone(),
            stopping: stopping.clone(),
        });
        let pool = Arc::new(WorkerPool::<Job>::start(
            settings.workers,
            settings.queue_size,
            handler.clone(),
        ));

        let expiry_stop = CancellationToken::new();
        let expiry_task = tokio::spawn(run_expiry_loop(
            expired_rx,
            pool.clone(),
            expiry_stop.clone(),
        ));

        RequestCoordinator {
            handler,
            pool,
            registry,
            generations,
            max_timeout: settings.max_timeout,
            stopping,
            expiry_stop,
            expiry_task: Mutex::new(Some(expiry_task)),
        }
    }

    /// Admits a request. The request is always answered eventually, or
    /// discarded if the client disconnects first. Malformed requests and
    /// requests arriving while the backlog is full are answered right away.
    pub fn submit(&self, mut request: ConfigRequest) {
        if let Err(e) = request.validate() {
            counter!(REQUESTS_REJECTED, "reason" => "invalid_request").increment(1);
            tracing::debug!(key = %request.key(), error = %e, "Rejected malformed config request");
            respond(request, Err(e.into()));
            return;
        }

        counter!(REQUESTS_RECEIVED).increment(1);
        request.clamp_timeout(self.max_timeout);
        dispatch(
            &self.pool,
            Job {
                request,
                mode: ResolveMode::Initial,
            },
        );
    }

    /// Makes `generation` the active generation of `application` and wakes
    /// every request parked on it. Returns the number of requests woken.
    pub fn on_activation(&self, application: &ApplicationId, generation: Generation) -> usize {
        counter!(ACTIVATIONS).increment(1);
        let active = self.generations.update(application, generation);
        let mut woken = self.wake(application);

        if !application.is_global() && self.generations.advance_aggregate(generation) {
            woken += self.wake(&ApplicationId::global());
        }

        tracing::info!(%application, generation = active, woken, "Activated application");
        woken
    }

    /// Forgets `application` and re-resolves its parked requests so their
    /// clients learn about the removal right away.
    pub fn on_application_removed(&self, application: &ApplicationId) -> usize {
        self.generations.remove(application);
        let mut woken = self.wake(application);
        // The aggregate view no longer includes this application
        woken += self.wake(&ApplicationId::global());

        tracing::info!(%application, woken, "Removed application");
        woken
    }

    fn wake(&self, application: &ApplicationId) -> usize {
        let drained = self.registry.drain_all(application);
        let count = drained.len();
        for request in drained {
            dispatch(
                &self.pool,
                Job {
                    request,
                    mode: ResolveMode::Reresolve,
                },
            );
        }
        count
    }

    /// Stops admitting requests and gives every parked request a final
    /// answer. Waits for the workers to finish.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(parked = self.registry.size(), "Shutting down request coordinator");

        self.expiry_stop.cancel();
        let expiry_task = self.expiry_task.lock().take();
        if let Some(task) = expiry_task
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "Expiry loop panicked");
        }

        for (_, request) in self.registry.drain_everything() {
            dispatch(
                &self.pool,
                Job {
                    request,
                    mode: ResolveMode::Forced,
                },
            );
        }
        self.pool.shutdown().await;

        // Requests parked by workers that were mid-resolution during the drain
        for (_, request) in self.registry.drain_everything() {
            self.handler
                .handle(Job {
                    request,
                    mode: ResolveMode::Forced,
                })
                .await;
        }
    }

    pub fn is_accepting(&self) -> bool {
        !self.stopping.load(Ordering::Acquire)
    }

    pub fn parked_count(&self) -> usize {
        self.registry.size()
    }

    pub fn parked_for(&self, application: &ApplicationId) -> usize {
        self.registry.size_for(application)
    }

    pub fn backlog(&self) -> usize {
        self.pool.backlog()
    }

    pub fn generations(&self) -> &ApplicationGenerations {
        &self.generations
    }

    /// Snapshot served on the admin `/status` endpoint.
    pub fn status(&self) -> serde_json::Value {
        let parked_by_application: serde_json::Map<String, serde_json::Value> = self
            .registry
            .applications()
            .into_iter()
            .map(|application| {
                let parked = self.registry.size_for(&application);
                (application.to_string(), parked.into())
            })
            .collect();

        serde_json::json!({
            "accepting": self.is_accepting(),
            "parked": self.parked_count(),
            "parked_by_application": parked_by_application,
            "backlog": self.backlog(),
            "queue_size": self.pool.queue_size(),
            "aggregate_generation": self.generations.aggregate(),
        })
    }
}

async fn run_expiry_loop(
    mut expired_rx: mpsc::UnboundedReceiver<ExpiredRequest>,
    pool: Arc<WorkerPool<Job>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            expired = expired_rx.recv() => match expired {
                Some(expired) => dispatch(&pool, Job { request: expired.request, mode: ResolveMode::Forced }),
                None => return,
            },
            _ = stop.cancelled() => break,
        }
    }

    // Later expirations are answered by the registry itself
    expired_rx.close();
    while let Ok(expired) = expired_rx.try_recv() {
        dispatch(
            &pool,
            Job {
                request: expired.request,
                mode: ResolveMode::Forced,
            },
        );
    }
}

/// Hands a job to the pool, answering it directly if the pool cannot take it.
fn dispatch(pool: &WorkerPool<Job>, job: Job) {
    match pool.try_submit(job) {
        Ok(()) => {}
        Err(SubmitError::Full(job)) => {
            counter!(REQUESTS_REJECTED, "reason" => "overload").increment(1);
            tracing::warn!(
                key = %job.request.key(),
                backlog = pool.backlog(),
                "Worker backlog full, rejecting config request"
            );
            respond(job.request, Err(ResolveError::Overload));
        }
        Err(SubmitError::Closed(job)) => {
            respond(
                job.request,
                Err(ResolveError::Internal("server is shutting down".into())),
            );
        }
    }
    gauge!(WORKER_BACKLOG).set(pool.backlog() as f64);
}

fn respond(request: ConfigRequest, result: ResponseResult) {
    let code = match &result {
        Ok(_) => "ok",
        Err(e) => e.as_str(),
    };
    counter!(RESPONSES, "code" => code).increment(1);

    let key = request.key().clone();
    if !request.respond(result) {
        tracing::debug!(%key, "Client went away before the response was delivered");
    }
}

fn discard(request: &ConfigRequest) {
    counter!(REQUESTS_DISCONNECTED).increment(1);
    tracing::debug!(key = %request.key(), "Client disconnected, discarding request");
}
