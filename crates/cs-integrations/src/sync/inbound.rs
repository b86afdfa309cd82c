//! Inbound processor: verified webhook → local entity store → identity map.

use std::sync::Arc;
use std::time::Instant;

use cs_core::config::PlatformConfig;
use cs_core::entity_store::EntityStore;
use cs_core::identity_map::IdentityMap;
use cs_core::types::{
    Origin, Platform, SyncAction, SyncDirection, SyncMapping, SyncResult,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::guard::LoopGuard;
use super::SyncObserver;
use crate::error::{Result, SyncError};
use crate::profile::{PlatformProfile, WebhookAction, WebhookEvent};
use crate::webhook;

pub struct InboundProcessor {
    config: Arc<PlatformConfig>,
    profile: Arc<dyn PlatformProfile>,
    store: Arc<dyn EntityStore>,
    identity: IdentityMap,
    guard: Arc<LoopGuard>,
    observer: Arc<dyn SyncObserver>,
    secret: Option<String>,
}

impl InboundProcessor {
    pub fn new(
        config: Arc<PlatformConfig>,
        profile: Arc<dyn PlatformProfile>,
        store: Arc<dyn EntityStore>,
        identity: IdentityMap,
        guard: Arc<LoopGuard>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        let secret = config.webhook_secret();
        Self {
            config,
            profile,
            store,
            identity,
            guard,
            observer,
            secret,
        }
    }

    /// Override the secret resolved from the config's env var.
    pub fn set_secret(&mut self, secret: Option<String>) {
        self.secret = secret;
    }

    pub fn platform(&self) -> Platform {
        self.config.platform
    }

    /// Verify and apply one webhook delivery.
    ///
    /// The signature is checked against the raw bytes before anything is
    /// parsed; a rejected webhook performs no reads or writes. Disabled
    /// direction or entity type yields `Ok` with a "disabled" result.
    pub async fn process(
        &self,
        event: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<SyncResult> {
        let platform = self.platform();
        webhook::check(
            &self.config,
            self.secret.as_deref(),
            self.profile.signature_encoding(),
            raw_body,
            signature,
        )?;

        let parsed = self.profile.parse_event(event);
        if !self.config.should_sync_from() {
            let entity_type = parsed.as_ref().map(|e| e.entity_type.as_str()).unwrap_or(event);
            debug!(%platform, event, "inbound sync disabled");
            return Ok(SyncResult::disabled(platform, entity_type));
        }
        if let Ok(parsed) = &parsed {
            if !self.config.entity_type_enabled(&parsed.entity_type) {
                debug!(%platform, entity_type = %parsed.entity_type, "entity type not synced");
                return Ok(SyncResult::disabled(platform, &parsed.entity_type));
            }
        }
        let parsed = parsed?;

        let body: Value = serde_json::from_slice(raw_body)
            .map_err(|e| SyncError::InvalidPayload(format!("webhook body is not JSON: {e}")))?;
        self.apply_event(&parsed, &body).await
    }

    /// Apply an already-verified event. Also used for queued imports.
    pub async fn apply_event(&self, event: &WebhookEvent, body: &Value) -> Result<SyncResult> {
        let started = Instant::now();
        let outcome = self.apply(event, body).await;
        let report = match &outcome {
            Ok(result) => result.clone(),
            Err(e) => SyncResult::failed(self.platform(), &event.entity_type, e.to_string()),
        };
        if !report.is_disabled() {
            self.observer
                .on_sync(SyncDirection::Inbound, &report, started.elapsed());
        }
        outcome
    }

    async fn apply(&self, event: &WebhookEvent, body: &Value) -> Result<SyncResult> {
        let platform = self.platform();
        let entity_type = event.entity_type.as_str();
        let external_id = self.profile.external_id(entity_type, body).ok_or_else(|| {
            SyncError::InvalidPayload(format!("{platform} {entity_type} payload has no id"))
        })?;

        match &event.action {
            WebhookAction::Delete => self.delete(entity_type, external_id).await,
            action => {
                if self.guard.is_echo(platform, entity_type, &external_id) {
                    debug!(%platform, entity_type, %external_id, "ignoring echo of our own write");
                    return Ok(SyncResult::skipped(platform, entity_type, "echo suppressed")
                        .with_ids(None, Some(external_id)));
                }
                let mut fields = self.profile.to_local(entity_type, body)?;
                let sync_action = match action {
                    WebhookAction::StatusUpdate(status) => {
                        fields.insert("status".into(), Value::String(status.clone()));
                        SyncAction::StatusUpdated
                    }
                    _ => SyncAction::Updated,
                };
                self.upsert(entity_type, external_id, fields, sync_action).await
            }
        }
    }

    async fn upsert(
        &self,
        entity_type: &str,
        external_id: String,
        fields: Map<String, Value>,
        sync_action: SyncAction,
    ) -> Result<SyncResult> {
        let platform = self.platform();
        let origin = Origin::External(platform);

        if let Some(cms_id) = self
            .identity
            .lookup_by_external_id(platform, entity_type, &external_id)
            .await?
        {
            match self.store.load(entity_type, &cms_id).await? {
                Some(mut entity) => {
                    entity.merge_from(&fields);
                    self.guard.mark_inbound(platform, entity_type, &cms_id);
                    self.store
                        .update(entity_type, &cms_id, entity.data, origin)
                        .await?;
                    self.identity
                        .upsert(&SyncMapping::new(
                            platform,
                            entity_type,
                            &cms_id,
                            &external_id,
                            SyncDirection::Inbound,
                        ))
                        .await?;
                    info!(%platform, entity_type, %cms_id, %external_id, "inbound update applied");
                    return Ok(SyncResult::succeeded(
                        platform,
                        entity_type,
                        sync_action,
                        Some(cms_id),
                        Some(external_id),
                    ));
                }
                None => {
                    warn!(%platform, entity_type, %cms_id, %external_id, "mapped entity is gone, recreating");
                    self.identity.remove(platform, entity_type, &cms_id).await?;
                }
            }
        }

        let cms_id = self.store.create(entity_type, fields, origin).await?;
        self.guard.mark_inbound(platform, entity_type, &cms_id);
        let mapping = SyncMapping::new(platform, entity_type, &cms_id, &external_id, SyncDirection::Inbound);
        if let Err(e) = self.identity.upsert(&mapping).await {
            // Another delivery won the race for this external id.
            warn!(%platform, entity_type, %cms_id, %external_id, error = %e, "discarding orphan entity");
            if let Err(cleanup) = self.store.delete(entity_type, &cms_id, origin).await {
                warn!(%cms_id, error = %cleanup, "failed to remove orphan entity");
            }
            return Err(e.into());
        }

        info!(%platform, entity_type, %cms_id, %external_id, "inbound create applied");
        let action = match sync_action {
            SyncAction::StatusUpdated => SyncAction::StatusUpdated,
            _ => SyncAction::Created,
        };
        Ok(SyncResult::succeeded(
            platform,
            entity_type,
            action,
            Some(cms_id),
            Some(external_id),
        ))
    }

    async fn delete(&self, entity_type: &str, external_id: String) -> Result<SyncResult> {
        let platform = self.platform();
        let Some(cms_id) = self
            .identity
            .lookup_by_external_id(platform, entity_type, &external_id)
            .await?
        else {
            debug!(%platform, entity_type, %external_id, "delete for unmapped resource");
            return Ok(SyncResult::succeeded(
                platform,
                entity_type,
                SyncAction::Deleted,
                None,
                Some(external_id),
            )
            .with_message("already deleted"));
        };

        self.guard.mark_inbound(platform, entity_type, &cms_id);
        let existed = self
            .store
            .delete(entity_type, &cms_id, Origin::External(platform))
            .await?;
        self.identity.remove(platform, entity_type, &cms_id).await?;

        info!(%platform, entity_type, %cms_id, %external_id, existed, "inbound delete applied");
        let result = SyncResult::succeeded(
            platform,
            entity_type,
            SyncAction::Deleted,
            Some(cms_id),
            Some(external_id),
        );
        Ok(if existed {
            result
        } else {
            result.with_message("already deleted")
        })
    }
}

