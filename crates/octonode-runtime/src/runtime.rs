//! Controller runtime: registration, scheduling, retries and shutdown.
//!
//! Every registered controller runs in its own tokio task. The task waits on
//! the controller's watches, collapses the events of one debounce quantum into
//! a single reconcile pass, and retries failed passes with exponential
//! backoff. Passes of one controller never overlap.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use octonode_runtime::{Runtime, RuntimeConfig, controllers::seccomp_profile_controller};
//! use octonode_state::InMemoryState;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut runtime = Runtime::new(Arc::new(InMemoryState::new()), RuntimeConfig::default());
//! runtime.register(seccomp_profile_controller())?;
//! runtime.start().await?;
//!
//! runtime.settle(Duration::from_secs(1)).await?;
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::select_all;
use octonode_core::ResourceKind;
use octonode_state::{ActivityTracker, DynState, ErrorCategory, Watch};
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RuntimeConfig, loader};
use crate::context::ControllerState;
use crate::controller::{Controller, FnController};
use crate::error::RuntimeError;
use crate::observability;

/// Per-controller counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    /// Completed passes, successful or not.
    pub passes: u64,
    pub failures: u64,
    /// Failures since the last successful pass.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
}

type SharedStats = Arc<Mutex<ControllerStats>>;

/// Runs a set of controllers against one store.
pub struct Runtime {
    state: DynState,
    config: RuntimeConfig,
    controllers: Vec<Arc<dyn Controller>>,
    names: HashSet<String>,
    owners: HashMap<ResourceKind, String>,
    stats: HashMap<String, SharedStats>,
    tracker: ActivityTracker,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl Runtime {
    pub fn new(state: DynState, config: RuntimeConfig) -> Self {
        Self {
            state,
            config,
            controllers: Vec::new(),
            names: HashSet::new(),
            owners: HashMap::new(),
            stats: HashMap::new(),
            tracker: ActivityTracker::new(),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Loads configuration from `path` (or `octonode.toml`), installs tracing
    /// at the configured level and builds a runtime around `state`.
    pub fn from_config_file(state: DynState, path: Option<&str>) -> Result<Self, RuntimeError> {
        let config = loader::load_config(path).map_err(RuntimeError::Config)?;
        observability::init_tracing_with_level(&config.logging.level);
        info!(
            path = path.unwrap_or(loader::DEFAULT_CONFIG_FILE),
            level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(Self::new(state, config))
    }

    /// Reloads configuration and applies what can change at runtime.
    ///
    /// The logging level is always applied. Scheduler, retry and watch
    /// settings are only replaced before [`Runtime::start`]; afterwards the
    /// workers keep the values they were started with. Returns whether the
    /// new logging level took effect.
    pub fn reload_config(&mut self, path: Option<&str>) -> Result<bool, RuntimeError> {
        let config = loader::load_config(path).map_err(RuntimeError::Config)?;
        let applied = observability::apply_logging_level(&config.logging.level);

        if self.started {
            if config.runtime != self.config.runtime
                || config.retry != self.config.retry
                || config.watch != self.config.watch
            {
                warn!("Scheduler settings changed; they take effect on the next start");
            }
            self.config.logging = config.logging;
        } else {
            self.config = config;
        }
        info!(level = %self.config.logging.level, applied, "Configuration reloaded");
        Ok(applied)
    }

    pub fn state(&self) -> &DynState {
        &self.state
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Token cancelled by [`Runtime::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Names of registered controllers in registration order.
    pub fn controller_names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }

    /// Registers a controller.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` after [`Runtime::start`]; `Registration` for an empty
    /// or duplicate name, an invalid kind, or an output kind that another
    /// controller already owns.
    pub fn register<C: Controller>(&mut self, controller: C) -> Result<(), RuntimeError> {
        self.register_arc(Arc::new(controller))
    }

    /// Registers a closure as a controller.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<ResourceKind>,
        output: Option<ResourceKind>,
        reconcile: F,
    ) -> Result<(), RuntimeError>
    where
        F: Fn(ControllerState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RuntimeError>> + Send + 'static,
    {
        self.register(FnController::new(name, inputs, output, reconcile))
    }

    pub fn register_arc(&mut self, controller: Arc<dyn Controller>) -> Result<(), RuntimeError> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }

        let name = controller.name().to_string();
        if name.is_empty() {
            return Err(RuntimeError::registration("controller name must not be empty"));
        }
        if self.names.contains(&name) {
            return Err(RuntimeError::registration(format!(
                "controller '{name}' is already registered"
            )));
        }
        for kind in controller.inputs().iter().chain(controller.output().iter()) {
            kind.validate().map_err(|e| {
                RuntimeError::registration(format!("controller '{name}': {e}"))
            })?;
        }
        if let Some(output) = controller.output() {
            if let Some(owner) = self.owners.get(&output) {
                return Err(RuntimeError::registration(format!(
                    "output kind {output} of '{name}' is already owned by '{owner}'"
                )));
            }
            self.owners.insert(output, name.clone());
        }

        debug!(
            controller = %name,
            inputs = ?controller.inputs(),
            output = ?controller.output(),
            "Registered controller"
        );
        self.names.insert(name.clone());
        self.stats.insert(name, SharedStats::default());
        self.controllers.push(controller);
        Ok(())
    }

    /// Subscribes every controller to its kinds and spawns the worker tasks.
    ///
    /// Each controller runs one pass right after start.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }
        self.config.validate().map_err(RuntimeError::Config)?;

        let owners = Arc::new(self.owners.clone());
        let options = self.config.watch_options().with_tracker(self.tracker.clone());

        let mut workers = Vec::with_capacity(self.controllers.len());
        for controller in &self.controllers {
            let mut kinds = controller.inputs();
            kinds.extend(controller.output());
            let mut seen = HashSet::new();
            kinds.retain(|k| seen.insert(k.clone()));

            let mut watches = Vec::with_capacity(kinds.len());
            for kind in &kinds {
                watches.push(self.state.watch(kind, options.clone()).await?);
            }

            let ctx = ControllerState::new(
                self.state.clone(),
                controller.name(),
                controller.output(),
                owners.clone(),
                self.cancel.child_token(),
                self.config.retry_policy(),
            );
            let stats = self
                .stats
                .get(controller.name())
                .cloned()
                .unwrap_or_default();

            workers.push(Worker {
                controller: controller.clone(),
                ctx,
                watches,
                stats,
                tracker: self.tracker.clone(),
                cancel: self.cancel.clone(),
                debounce: self.config.debounce(),
                backoff_initial: self.config.backoff_initial(),
                backoff_max: self.config.backoff_max(),
                pass_timeout: self.config.reconcile_timeout(),
            });
        }

        for worker in workers {
            // the initial pass counts as outstanding work until it completes
            self.tracker.add(1);
            self.tasks.push(tokio::spawn(worker.run()));
        }
        self.started = true;

        info!(
            controllers = self.controllers.len(),
            backend = self.state.backend_name(),
            "Controller runtime started"
        );
        Ok(())
    }

    /// Waits until no events, passes or retries are outstanding.
    ///
    /// # Errors
    ///
    /// `NotStarted` before [`Runtime::start`], `SettleTimeout` if the runtime
    /// is still busy when `timeout` expires.
    pub async fn settle(&self, timeout: Duration) -> Result<(), RuntimeError> {
        if !self.started {
            return Err(RuntimeError::NotStarted);
        }
        tokio::time::timeout(timeout, self.tracker.wait_idle())
            .await
            .map_err(|_| RuntimeError::SettleTimeout(timeout))
    }

    /// Statistics of a controller, if registered.
    pub fn stats(&self, name: &str) -> Option<ControllerStats> {
        self.stats.get(name).map(|s| s.lock().clone())
    }

    /// Cancels all controllers and waits for their tasks to exit.
    pub async fn shutdown(&mut self) -> Result<(), RuntimeError> {
        if !self.started {
            return Err(RuntimeError::NotStarted);
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "Controller task ended abnormally");
            }
        }
        info!("Controller runtime stopped");
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("controllers", &self.controller_names())
            .field("started", &self.started)
            .field("pending", &self.tracker.pending())
            .finish_non_exhaustive()
    }
}

struct Worker {
    controller: Arc<dyn Controller>,
    ctx: ControllerState,
    watches: Vec<Watch>,
    stats: SharedStats,
    tracker: ActivityTracker,
    cancel: CancellationToken,
    debounce: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
    pass_timeout: Option<Duration>,
}

impl Worker {
    async fn run(mut self) {
        let name = self.controller.name().to_string();
        // tracker units this worker owes for the next pass
        let mut held: usize = 1;
        let mut triggered = true;
        let mut retry_at: Option<Instant> = None;
        let mut backoff = self.backoff_initial;

        debug!(controller = %name, watches = self.watches.len(), "Controller worker started");

        loop {
            if !triggered {
                let retry_timer = async {
                    match retry_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    open = any_ready(&self.watches) => {
                        if !open {
                            warn!(controller = %name, "Watch closed, stopping controller");
                            break;
                        }
                    }
                    _ = retry_timer => {}
                }
            }

            // collapse everything arriving within one quantum into this pass
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.debounce) => {}
            }
            let drained: usize = self.watches.iter_mut().map(|w| w.drain().len()).sum();
            held += drained;
            triggered = false;
            retry_at = None;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.pass() => result,
            };

            match result {
                Ok(()) => {
                    let mut stats = self.stats.lock();
                    stats.passes += 1;
                    stats.consecutive_failures = 0;
                    stats.last_success = Some(OffsetDateTime::now_utc());
                    backoff = self.backoff_initial;
                    debug!(controller = %name, events = drained, "Reconcile pass completed");
                }
                Err(e) if e.is_cancelled() && self.cancel.is_cancelled() => break,
                Err(e) => {
                    {
                        let mut stats = self.stats.lock();
                        stats.passes += 1;
                        stats.failures += 1;
                        stats.consecutive_failures += 1;
                        stats.last_error = Some(e.to_string());
                    }
                    log_failure(&name, &e, backoff);

                    retry_at = Some(Instant::now() + backoff);
                    backoff = backoff.saturating_mul(2).min(self.backoff_max);
                    // the pending retry is outstanding work
                    self.tracker.add(1);
                    self.tracker.done(held);
                    held = 1;
                    continue;
                }
            }

            self.tracker.done(held);
            held = 0;
        }

        self.tracker.done(held);
        debug!(controller = %name, "Controller worker stopped");
    }

    /// Runs one pass with panic isolation and the optional timeout.
    async fn pass(&self) -> Result<(), RuntimeError> {
        let name = self.controller.name();
        let guarded = AssertUnwindSafe(self.controller.reconcile(&self.ctx)).catch_unwind();

        let outcome = match self.pass_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(RuntimeError::PassTimeout {
                        controller: name.to_string(),
                        timeout,
                    });
                }
            },
            None => guarded.await,
        };

        outcome.unwrap_or_else(|panic| {
            Err(RuntimeError::Panicked {
                controller: name.to_string(),
                message: panic_message(panic.as_ref()),
            })
        })
    }
}

/// Resolves once any watch has queued events; `false` if one closed.
async fn any_ready(watches: &[Watch]) -> bool {
    if watches.is_empty() {
        return std::future::pending().await;
    }
    let (open, _, _) = select_all(watches.iter().map(|w| Box::pin(w.ready()))).await;
    open
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn log_failure(controller: &str, err: &RuntimeError, retry_in: Duration) {
    let retry_ms = retry_in.as_millis() as u64;
    match err.state_category() {
        Some(ErrorCategory::Programming) => {
            error!(controller, error = %err, retry_ms, "Reconcile pass violated store rules");
        }
        Some(ErrorCategory::Degraded) => {
            warn!(controller, error = %err, retry_ms, "Convergence degraded, retries exhausted");
        }
        _ => match err {
            RuntimeError::Panicked { .. } | RuntimeError::PassTimeout { .. } => {
                error!(controller, error = %err, retry_ms, "Reconcile pass aborted");
            }
            _ => warn!(controller, error = %err, retry_ms, "Reconcile pass failed"),
        },
    }
}
