//! Outbound dispatcher: local change → platform API → identity map.

use std::sync::Arc;
use std::time::Instant;

use cs_core::config::PlatformConfig;
use cs_core::identity_map::IdentityMap;
use cs_core::types::{
    ChangeAction, CmsEntity, Platform, SyncAction, SyncDirection, SyncMapping, SyncResult,
};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::guard::LoopGuard;
use super::retry::RetryPolicy;
use super::{SyncFailure, SyncObserver};
use crate::client::PlatformApi;
use crate::error::SyncError;
use crate::profile::PlatformProfile;

pub struct OutboundDispatcher {
    config: Arc<PlatformConfig>,
    profile: Arc<dyn PlatformProfile>,
    api: Arc<dyn PlatformApi>,
    identity: IdentityMap,
    retry: RetryPolicy,
    guard: Arc<LoopGuard>,
    observer: Arc<dyn SyncObserver>,
}

impl OutboundDispatcher {
    pub fn new(
        config: Arc<PlatformConfig>,
        profile: Arc<dyn PlatformProfile>,
        api: Arc<dyn PlatformApi>,
        identity: IdentityMap,
        retry: RetryPolicy,
        guard: Arc<LoopGuard>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            config,
            profile,
            api,
            identity,
            retry,
            guard,
            observer,
        }
    }

    pub fn platform(&self) -> Platform {
        self.config.platform
    }

    /// Push one local change. Failures come back as a `success: false`
    /// result carrying the error and the attempts spent.
    pub async fn dispatch(&self, entity: &CmsEntity, action: ChangeAction) -> SyncResult {
        match self.try_dispatch(entity, action, 0).await {
            Ok(result) => result,
            Err(failure) => SyncResult::failed(self.platform(), &entity.entity_type, failure.error.to_string())
                .with_ids(entity.id.clone(), None)
                .with_attempts(failure.attempts),
        }
    }

    /// Push one local change, with `prior` attempts already spent on it.
    ///
    /// Disabled direction or entity type yields `Ok` with a "disabled"
    /// result. The identity map is only written after the platform call
    /// succeeded.
    pub async fn try_dispatch(
        &self,
        entity: &CmsEntity,
        action: ChangeAction,
        prior: u32,
    ) -> Result<SyncResult, SyncFailure> {
        let started = Instant::now();
        let outcome = self.run(entity, action, prior).await;

        let report = match &outcome {
            Ok(result) => result.clone(),
            Err(f) => SyncResult::failed(self.platform(), &entity.entity_type, f.error.to_string())
                .with_ids(entity.id.clone(), None)
                .with_attempts(f.attempts),
        };
        if !report.is_disabled() {
            self.observer
                .on_sync(SyncDirection::Outbound, &report, started.elapsed());
        }
        outcome
    }

    async fn run(
        &self,
        entity: &CmsEntity,
        action: ChangeAction,
        prior: u32,
    ) -> Result<SyncResult, SyncFailure> {
        let platform = self.platform();
        let entity_type = entity.entity_type.as_str();

        if !self.config.should_sync_to() || !self.config.entity_type_enabled(entity_type) {
            debug!(%platform, entity_type, "outbound sync disabled");
            return Ok(SyncResult::disabled(platform, entity_type));
        }
        if !self.profile.supports(entity_type) {
            return Err(SyncFailure::new(self.profile.unsupported(entity_type), 0));
        }
        let cms_id = entity.id.clone().ok_or_else(|| {
            SyncFailure::new(
                SyncError::InvalidPayload("entity has no cms id".into()),
                0,
            )
        })?;

        let existing = self
            .identity
            .lookup_by_cms_id(platform, entity_type, &cms_id)
            .await
            .map_err(|e| SyncFailure::new(e.into(), prior + 1))?;

        if action == ChangeAction::Delete {
            return self.delete(entity_type, cms_id, existing, prior).await;
        }

        let body = self
            .profile
            .to_external(entity)
            .map_err(|e| SyncFailure::new(e, 0))?;

        let (sync_action, external_id, attempts) = match existing {
            Some(external_id) => match self.update(entity_type, &external_id, &body, prior).await {
                Ok(attempts) => (SyncAction::Updated, external_id, attempts),
                Err(f) if f.error.is_not_found() => {
                    warn!(%platform, entity_type, %cms_id, %external_id, "mapped resource is gone, recreating");
                    self.identity
                        .remove(platform, entity_type, &cms_id)
                        .await
                        .map_err(|e| SyncFailure::new(e.into(), f.attempts))?;
                    if f.attempts >= self.retry.max_retries {
                        let error = SyncError::RetriesExhausted {
                            attempts: f.attempts,
                            last_error: f.error.to_string(),
                        };
                        return Err(SyncFailure::new(error, f.attempts));
                    }
                    let (id, attempts) = self.create(entity_type, &body, f.attempts).await?;
                    (SyncAction::Created, id, attempts)
                }
                Err(f) => return Err(f),
            },
            None => {
                let (id, attempts) = self.create(entity_type, &body, prior).await?;
                (SyncAction::Created, id, attempts)
            }
        };

        self.guard.mark_outbound(platform, entity_type, &external_id);
        let mapping = SyncMapping::new(platform, entity_type, &cms_id, &external_id, SyncDirection::Outbound);
        self.identity
            .upsert(&mapping)
            .await
            .map_err(|e| SyncFailure::new(e.into(), attempts))?;

        info!(%platform, entity_type, %cms_id, %external_id, action = ?sync_action, attempts, "outbound sync complete");
        Ok(
            SyncResult::succeeded(platform, entity_type, sync_action, Some(cms_id), Some(external_id))
                .with_attempts(attempts),
        )
    }

    async fn create(&self, entity_type: &str, body: &Value, prior: u32) -> Result<(String, u32), SyncFailure> {
        let path = self
            .profile
            .collection_path(entity_type)
            .map_err(|e| SyncFailure::new(e, 0))?;
        let (api, path) = (&self.api, path.as_str());
        let out = self
            .retry
            .run(prior, move |_| api.request(Method::POST, path, Some(body)))
            .await;
        let response = out.result.map_err(|e| SyncFailure::new(e, out.attempts))?;
        let external_id = self.profile.external_id(entity_type, &response).ok_or_else(|| {
            SyncFailure::new(
                SyncError::InvalidPayload(format!("create response for {entity_type} carried no id")),
                out.attempts,
            )
        })?;
        Ok((external_id, out.attempts))
    }

    async fn update(
        &self,
        entity_type: &str,
        external_id: &str,
        body: &Value,
        prior: u32,
    ) -> Result<u32, SyncFailure> {
        let path = self
            .profile
            .item_path(entity_type, external_id)
            .map_err(|e| SyncFailure::new(e, 0))?;
        let body = self.profile.with_external_id(entity_type, body.clone(), external_id);
        let method = self.profile.update_method();
        let (api, path, body) = (&self.api, path.as_str(), &body);
        let out = self
            .retry
            .run(prior, move |_| api.request(method.clone(), path, Some(body)))
            .await;
        out.result.map_err(|e| SyncFailure::new(e, out.attempts))?;
        Ok(out.attempts)
    }

    async fn delete(
        &self,
        entity_type: &str,
        cms_id: String,
        existing: Option<String>,
        prior: u32,
    ) -> Result<SyncResult, SyncFailure> {
        let platform = self.platform();
        let Some(external_id) = existing else {
            debug!(%platform, entity_type, %cms_id, "delete of unmapped entity, nothing to do");
            return Ok(SyncResult::succeeded(platform, entity_type, SyncAction::Deleted, Some(cms_id), None)
                .with_message("not mapped")
                .with_attempts(0));
        };

        let path = self
            .profile
            .delete_path(entity_type, &external_id)
            .map_err(|e| SyncFailure::new(e, 0))?;
        let (api, path_ref) = (&self.api, path.as_str());
        let out = self
            .retry
            .run(prior, move |_| api.request(Method::DELETE, path_ref, None))
            .await;
        let mut message = None;
        match out.result {
            Ok(_) => {}
            Err(e) if e.is_not_found() => message = Some("already deleted"),
            Err(e) => return Err(SyncFailure::new(e, out.attempts)),
        }

        self.identity
            .remove(platform, entity_type, &cms_id)
            .await
            .map_err(|e| SyncFailure::new(e.into(), out.attempts))?;

        info!(%platform, entity_type, %cms_id, %external_id, attempts = out.attempts, "outbound delete complete");
        let result = SyncResult::succeeded(platform, entity_type, SyncAction::Deleted, Some(cms_id), Some(external_id))
            .with_attempts(out.attempts);
        Ok(match message {
            Some(m) => result.with_message(m),
            None => result,
        })
    }
}
