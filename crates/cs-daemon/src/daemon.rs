use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cs_bridge::event_bus::EventBus;
use cs_bridge::http_api::{api_router_with_auth, ApiState};
use cs_bridge::observer::BridgeObserver;
use cs_bridge::protocol::SyncEvent;
use cs_core::config::{Config, CredentialProvider};
use cs_core::db::SyncDb;
use cs_core::entity_store::{EntityStore, SqliteEntityStore};
use cs_core::shutdown::ShutdownSignal;
use cs_core::types::{ChangeEvent, Platform};
use cs_integrations::error::SyncError;
use cs_integrations::sync::hub::SyncHub;
use cs_integrations::sync::runner::BatchRunner;
use tracing::{debug, error, info, warn};

/// Background loops that must report stopped before shutdown completes.
const BACKGROUND_LOOPS: usize = 2;

/// Loop intervals, from `[queue]` and `[guard]`.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// Queue worker tick (default 5s).
    pub poll: Duration,
    /// How often expired loop-guard marks are dropped.
    pub guard_purge: Duration,
    /// Claims older than this are released on start.
    pub claim_lease: Duration,
}

impl DaemonIntervals {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll: Duration::from_secs(config.queue.poll_interval_secs.max(1)),
            guard_purge: Duration::from_millis(config.guard.echo_window_ms.max(1000) * 5),
            claim_lease: Duration::from_secs(config.queue.claim_lease_secs),
        }
    }
}

/// The sync daemon.
///
/// Owns the queue worker and the change observer, and serves the bridge
/// router. Shuts down gracefully when the [`ShutdownSignal`] fires: the
/// HTTP server stops accepting, and each loop finishes the operation it
/// is running before exiting.
pub struct Daemon {
    config: Config,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
    event_bus: EventBus,
    store: SqliteEntityStore,
    api_state: Arc<ApiState>,
}

impl Daemon {
    /// Open the database named by `[store]` and build a hub with an HTTP
    /// client per configured platform.
    pub async fn new(config: Config) -> Result<Self> {
        let path = config.store.resolved_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let db = SyncDb::open(&path)
            .await
            .with_context(|| format!("failed to open sync database at {}", path.display()))?;

        let event_bus = EventBus::new();
        let store = db.entity_store();
        let hub = SyncHub::from_config(
            &config,
            &db,
            Arc::new(store.clone()) as Arc<dyn EntityStore>,
            Arc::new(BridgeObserver::new(event_bus.clone())),
        )
        .context("failed to build platform clients")?;
        info!(path = %path.display(), platforms = hub.platforms().count(), "sync database ready");

        Ok(Self::with_hub(config, store, hub, event_bus))
    }

    /// Assemble a daemon around an existing hub. `hub` should report to an
    /// observer publishing on `event_bus`.
    pub fn with_hub(config: Config, store: SqliteEntityStore, hub: SyncHub, event_bus: EventBus) -> Self {
        let runner = Arc::new(BatchRunner::new(Arc::new(hub), &config.queue));
        let api_state = Arc::new(ApiState::new(runner, event_bus.clone()));
        Self {
            intervals: DaemonIntervals::from_config(&config),
            config,
            shutdown: ShutdownSignal::new(),
            event_bus,
            store,
            api_state,
        }
    }

    pub fn set_intervals(&mut self, intervals: DaemonIntervals) {
        self.intervals = intervals;
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn api_state(&self) -> &Arc<ApiState> {
        &self.api_state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind `[daemon] host:port` and run until shutdown.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.daemon.host, self.config.daemon.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    /// Run on a pre-bound listener until shutdown (blocking).
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let runner = self.api_state.runner.clone();
        if let Err(e) = runner.release_stale(self.intervals.claim_lease).await {
            warn!(error = %e, "could not release stale claims");
        }

        let admin_key = CredentialProvider::admin_api_key(&self.config.daemon);
        if admin_key.is_none() {
            warn!(env = %self.config.daemon.admin_api_key_env, "no admin API key set, operator API is open");
        }
        let router = api_router_with_auth(self.api_state.clone(), admin_key);

        tokio::spawn(Self::queue_worker(
            self.api_state.clone(),
            self.intervals.clone(),
            self.shutdown.clone(),
        ));
        tokio::spawn(Self::change_observer(
            self.store.subscribe(),
            self.api_state.clone(),
            self.intervals.poll,
            self.shutdown.clone(),
        ));

        let bind_addr = listener.local_addr()?;
        info!(%bind_addr, poll_secs = self.intervals.poll.as_secs(), "listening for webhooks and operator requests");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
            .context("HTTP server failed")?;

        let mut shutdown = self.shutdown.clone();
        if !shutdown.wait_stopped(BACKGROUND_LOOPS, Duration::from_secs(30)).await {
            warn!("background loops did not stop in time");
        }
        info!("daemon stopped");
        Ok(())
    }

    /// Drain the queue every `poll` tick, and drop expired guard marks.
    async fn queue_worker(state: Arc<ApiState>, intervals: DaemonIntervals, shutdown: ShutdownSignal) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut poll = tokio::time::interval(intervals.poll);
        let mut purge = tokio::time::interval(intervals.guard_purge);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        purge.tick().await;

        loop {
            if shutdown.is_shutting_down() {
                break;
            }
            tokio::select! {
                _ = poll.tick() => {
                    match state.runner.process_queue(state.runner.time_budget()).await {
                        Ok(report) if report.processed > 0 => {
                            state.event_bus.publish(SyncEvent::QueueProcessed(report));
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "queue run failed"),
                    }
                    // Refreshes the queue gauges.
                    if let Err(e) = state.queue_stats().await {
                        warn!(error = %e, "could not read queue stats");
                    }
                }
                _ = purge.tick() => {
                    let guard = state.hub().guard();
                    guard.purge_expired();
                    debug!(entries = guard.len(), "loop guard purged");
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("queue worker stopped");
        shutdown.mark_stopped();
    }

    /// Turn local entity changes into outbound queue operations.
    ///
    /// Platforms the hub could not enqueue for are kept and re-driven
    /// every `poll` tick until their operations are in the queue.
    async fn change_observer(
        changes: flume::Receiver<ChangeEvent>,
        state: Arc<ApiState>,
        retry_every: Duration,
        shutdown: ShutdownSignal,
    ) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut retry = tokio::time::interval(retry_every);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut redrive: Vec<(ChangeEvent, Vec<Platform>)> = Vec::new();

        loop {
            if shutdown.is_shutting_down() {
                break;
            }
            tokio::select! {
                change = changes.recv_async() => {
                    let Ok(change) = change else {
                        warn!("change channel closed");
                        break;
                    };
                    let outcome = state.hub().handle_change(&change).await;
                    Self::track_fan_out(change, outcome, &mut redrive);
                }
                _ = retry.tick(), if !redrive.is_empty() => {
                    for (change, platforms) in std::mem::take(&mut redrive) {
                        let outcome = state.hub().handle_change_for(&change, &platforms).await;
                        Self::track_fan_out(change, outcome, &mut redrive);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        if !redrive.is_empty() {
            error!(changes = redrive.len(), "stopping with changes not yet enqueued");
        }
        info!("change observer stopped");
        shutdown.mark_stopped();
    }

    fn track_fan_out(
        change: ChangeEvent,
        outcome: cs_integrations::error::Result<usize>,
        redrive: &mut Vec<(ChangeEvent, Vec<Platform>)>,
    ) {
        match outcome {
            Ok(0) => {}
            Ok(enqueued) => debug!(
                entity_type = %change.entity_type,
                cms_id = %change.cms_id,
                origin = %change.origin,
                enqueued,
                "change fanned out"
            ),
            Err(SyncError::Enqueue { platforms, enqueued, error }) => {
                warn!(
                    entity_type = %change.entity_type,
                    cms_id = %change.cms_id,
                    enqueued,
                    pending_platforms = platforms.len(),
                    %error,
                    "change partly enqueued, will retry"
                );
                redrive.push((change, platforms));
            }
            Err(e) => error!(
                entity_type = %change.entity_type,
                cms_id = %change.cms_id,
                error = %e,
                "could not enqueue change"
            ),
        }
    }
}
