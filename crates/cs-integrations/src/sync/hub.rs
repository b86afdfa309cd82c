use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cs_core::config::{Config, PlatformConfig};
use cs_core::db::{StoreError, SyncDb};
use cs_core::entity_store::EntityStore;
use cs_core::identity_map::IdentityMap;
use cs_core::sync_queue::SyncQueue;
use cs_core::types::{
    ChangeAction, ChangeEvent, CmsEntity, OperationPayload, Platform, SyncOperation, SyncResult,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::dispatcher::OutboundDispatcher;
use super::guard::LoopGuard;
use super::inbound::InboundProcessor;
use super::retry::RetryPolicy;
use super::{SyncFailure, SyncObserver};
use crate::client::{PlatformApi, PlatformClient};
use crate::error::{Result, SyncError};
use crate::profile::{profile_for, PlatformProfile};

// ---------------------------------------------------------------------------
// PlatformCoordinator
// ---------------------------------------------------------------------------

/// Everything needed to sync one platform in both directions.
pub struct PlatformCoordinator {
    pub config: Arc<PlatformConfig>,
    pub profile: Arc<dyn PlatformProfile>,
    pub api: Arc<dyn PlatformApi>,
    pub dispatcher: OutboundDispatcher,
    pub inbound: InboundProcessor,
}

// ---------------------------------------------------------------------------
// SyncHub
// ---------------------------------------------------------------------------

/// Routes local changes, queued operations and webhooks to the per-platform
/// coordinators that share one identity map, queue and loop guard.
pub struct SyncHub {
    coordinators: BTreeMap<Platform, PlatformCoordinator>,
    store: Arc<dyn EntityStore>,
    identity: IdentityMap,
    queue: SyncQueue,
    guard: Arc<LoopGuard>,
    retry: RetryPolicy,
    observer: Arc<dyn SyncObserver>,
}

impl SyncHub {
    pub fn new(
        store: Arc<dyn EntityStore>,
        identity: IdentityMap,
        queue: SyncQueue,
        guard: Arc<LoopGuard>,
        retry: RetryPolicy,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            coordinators: BTreeMap::new(),
            store,
            identity,
            queue,
            guard,
            retry,
            observer,
        }
    }

    /// Build a hub with an HTTP client per configured platform.
    pub fn from_config(
        config: &Config,
        db: &SyncDb,
        store: Arc<dyn EntityStore>,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<Self> {
        let guard = Arc::new(LoopGuard::new(Duration::from_millis(config.guard.echo_window_ms)));
        let mut hub = Self::new(
            store,
            db.identity_map(),
            db.sync_queue(),
            guard,
            RetryPolicy::from_config(&config.retry),
            observer,
        );
        for platform in &config.platforms {
            let profile = profile_for(platform);
            let client = PlatformClient::from_config(platform)?.with_content_type(profile.content_type());
            hub.register_with_profile(platform.clone(), profile, Arc::new(client));
        }
        Ok(hub)
    }

    /// Add a platform, using the standard profile for it.
    pub fn register(&mut self, config: PlatformConfig, api: Arc<dyn PlatformApi>) {
        let profile = profile_for(&config);
        self.register_with_profile(config, profile, api);
    }

    pub fn register_with_profile(
        &mut self,
        config: PlatformConfig,
        profile: Arc<dyn PlatformProfile>,
        api: Arc<dyn PlatformApi>,
    ) {
        let platform = config.platform;
        let config = Arc::new(config);
        let dispatcher = OutboundDispatcher::new(
            config.clone(),
            profile.clone(),
            api.clone(),
            self.identity.clone(),
            self.retry,
            self.guard.clone(),
            self.observer.clone(),
        );
        let inbound = InboundProcessor::new(
            config.clone(),
            profile.clone(),
            self.store.clone(),
            self.identity.clone(),
            self.guard.clone(),
            self.observer.clone(),
        );
        info!(%platform, mode = ?config.mode, "platform registered");
        self.coordinators.insert(
            platform,
            PlatformCoordinator {
                config,
                profile,
                api,
                dispatcher,
                inbound,
            },
        );
    }

    /// Replace the webhook secret of a registered platform.
    pub fn set_webhook_secret(&mut self, platform: Platform, secret: Option<String>) {
        if let Some(c) = self.coordinators.get_mut(&platform) {
            c.inbound.set_secret(secret);
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn coordinator(&self, platform: Platform) -> Option<&PlatformCoordinator> {
        self.coordinators.get(&platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.coordinators.keys().copied()
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn guard(&self) -> &Arc<LoopGuard> {
        &self.guard
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn observer(&self) -> &Arc<dyn SyncObserver> {
        &self.observer
    }

    // -- change observer ----------------------------------------------------

    /// Enqueue an outbound operation for every platform that should see a
    /// local change. Returns how many were enqueued.
    ///
    /// Platforms with outbound sync off, or not syncing the entity type,
    /// are skipped, as is the platform the change came from.
    pub async fn handle_change(&self, event: &ChangeEvent) -> Result<usize> {
        self.fan_out(event, None).await
    }

    /// Like [`SyncHub::handle_change`], limited to `platforms`. Used to
    /// re-drive the platforms an earlier fan-out could not enqueue for.
    pub async fn handle_change_for(&self, event: &ChangeEvent, platforms: &[Platform]) -> Result<usize> {
        self.fan_out(event, Some(platforms)).await
    }

    /// A platform whose enqueue keeps failing does not stop the others;
    /// the failures come back together as [`SyncError::Enqueue`].
    async fn fan_out(&self, event: &ChangeEvent, only: Option<&[Platform]>) -> Result<usize> {
        let mut enqueued = 0;
        let mut failed = Vec::new();
        let mut last_error = None;
        for (platform, c) in &self.coordinators {
            if only.is_some_and(|only| !only.contains(platform)) {
                continue;
            }
            if !c.config.should_sync_to()
                || !c.config.entity_type_enabled(&event.entity_type)
                || !c.profile.supports(&event.entity_type)
            {
                continue;
            }
            if !self.guard.should_dispatch(event, *platform) {
                continue;
            }
            let op = SyncOperation::outbound(*platform, &event.entity_type, &event.cms_id, event.action);
            match self.enqueue_with_retry(&op).await {
                Ok(()) => {
                    debug!(%platform, entity_type = %event.entity_type, cms_id = %event.cms_id, action = %event.action, "outbound operation enqueued");
                    enqueued += 1;
                }
                Err(e) => {
                    error!(%platform, entity_type = %event.entity_type, cms_id = %event.cms_id, error = %e, "could not enqueue outbound operation");
                    failed.push(*platform);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            None => Ok(enqueued),
            Some(e) => Err(SyncError::Enqueue {
                platforms: failed,
                enqueued,
                error: e.to_string(),
            }),
        }
    }

    /// Store errors here are usually a busy database, so the enqueue is
    /// retried on the retry policy's schedule.
    async fn enqueue_with_retry(&self, op: &SyncOperation) -> std::result::Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.queue.enqueue(op).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.retry.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(op_id = %op.id, attempt, delay_ms = delay.as_millis() as u64, error = %e, "enqueue failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // -- queued operations --------------------------------------------------

    /// Run one queued operation against its platform.
    ///
    /// `op.attempt` counts against the retry budget, so re-running a
    /// released operation never exceeds `max_retries` attempts in total.
    pub async fn execute(&self, op: &SyncOperation) -> std::result::Result<SyncResult, SyncFailure> {
        let Some(c) = self.coordinators.get(&op.platform) else {
            return Err(SyncFailure::new(
                SyncError::ConfigDisabled {
                    platform: op.platform,
                    entity_type: op.entity_type.clone(),
                },
                op.attempt,
            ));
        };

        match &op.payload {
            OperationPayload::ToExternal {
                action,
                cms_id,
                snapshot,
            } => {
                let entity = match (action, snapshot) {
                    (_, Some(data)) => CmsEntity {
                        entity_type: op.entity_type.clone(),
                        id: Some(cms_id.clone()),
                        data: data.clone(),
                    },
                    (ChangeAction::Delete, None) => CmsEntity::new(&op.entity_type).with_id(cms_id),
                    (_, None) => match self.store.load(&op.entity_type, cms_id).await {
                        Ok(Some(entity)) => entity,
                        Ok(None) => {
                            debug!(platform = %op.platform, entity_type = %op.entity_type, %cms_id, "entity gone before sync");
                            return Ok(SyncResult::skipped(op.platform, &op.entity_type, "entity no longer exists")
                                .with_ids(Some(cms_id.clone()), None));
                        }
                        Err(e) => return Err(SyncFailure::new(e.into(), op.attempt + 1)),
                    },
                };
                c.dispatcher.try_dispatch(&entity, *action, op.attempt).await
            }
            OperationPayload::FromExternal { event, body } => {
                let parsed = c
                    .profile
                    .parse_event(event)
                    .map_err(|e| SyncFailure::new(e, op.attempt + 1))?;
                c.inbound
                    .apply_event(&parsed, body)
                    .await
                    .map_err(|e| SyncFailure::new(e, op.attempt + 1))
            }
        }
    }

    /// Direct, unqueued push of a local entity to one platform.
    pub async fn sync_entity(&self, platform: Platform, entity: &CmsEntity, action: ChangeAction) -> SyncResult {
        match self.coordinators.get(&platform) {
            Some(c) => c.dispatcher.dispatch(entity, action).await,
            None => SyncResult::disabled(platform, &entity.entity_type),
        }
    }

    // -- webhooks -----------------------------------------------------------

    /// Verify and apply a webhook. An unconfigured platform is "disabled".
    pub async fn process_webhook(
        &self,
        platform: Platform,
        event: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<SyncResult> {
        match self.coordinators.get(&platform) {
            Some(c) => c.inbound.process(event, raw_body, signature).await,
            None => {
                warn!(%platform, event, "webhook for unconfigured platform");
                Ok(SyncResult::disabled(platform, event))
            }
        }
    }

    /// Header names a platform uses for signature and event name.
    pub fn webhook_headers(&self, platform: Platform) -> Option<(&'static str, &'static str)> {
        self.coordinators
            .get(&platform)
            .map(|c| (c.profile.signature_header(), c.profile.event_header()))
    }

    // -- bulk import --------------------------------------------------------

    /// Every resource of a type on the platform, as returned by one list call.
    pub async fn fetch_all(&self, platform: Platform, entity_type: &str) -> Result<Vec<Value>> {
        let c = self
            .coordinators
            .get(&platform)
            .ok_or_else(|| SyncError::ConfigDisabled {
                platform,
                entity_type: entity_type.to_string(),
            })?;
        let (method, path, body) = c.profile.list_request(entity_type)?;
        let response = c.api.request(method, &path, body.as_ref()).await?;
        Ok(c.profile.list_items(entity_type, &response))
    }
}
