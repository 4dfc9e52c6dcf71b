//! Active resource selection with a refresh interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{ResourceError, ResourceResult};
use crate::group::{Resource, ResourceGroup};
use crate::probe::ResourceProbe;

/// Default interval after which the active resource is re-evaluated.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedSelection {
    resource: Resource,
    selected_at: Instant,
}

/// Picks the active endpoint of a resource group.
///
/// The selection is cached per group for the refresh interval. A reported
/// failure drops the cached selection and marks the endpoint unhealthy for
/// one interval, so the next call moves on to the next endpoint.
#[derive(Clone)]
pub struct ResourceSelector {
    groups: Arc<HashMap<String, ResourceGroup>>,
    probe: Arc<dyn ResourceProbe>,
    refresh: Duration,
    active: Arc<RwLock<HashMap<String, CachedSelection>>>,
    unhealthy: Arc<RwLock<HashMap<(String, String), Instant>>>,
}

impl ResourceSelector {
    pub fn new(
        groups: impl IntoIterator<Item = ResourceGroup>,
        probe: Arc<dyn ResourceProbe>,
        refresh: Duration,
    ) -> Self {
        let groups = groups
            .into_iter()
            .map(|group| (group.name.clone(), group))
            .collect();
        Self {
            groups: Arc::new(groups),
            probe,
            refresh,
            active: Arc::new(RwLock::new(HashMap::new())),
            unhealthy: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns true when `group` is configured.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Returns the active resource of `group`.
    #[instrument(skip(self))]
    pub async fn select(&self, group: &str) -> ResourceResult<Resource> {
        {
            let active = self.active.read().await;
            if let Some(cached) = active.get(group) {
                if cached.selected_at.elapsed() < self.refresh {
                    return Ok(cached.resource.clone());
                }
            }
        }

        let config = self
            .groups
            .get(group)
            .ok_or_else(|| ResourceError::UnknownGroup(group.to_string()))?;

        let resource = self.evaluate(config).await?;

        let mut active = self.active.write().await;
        active.insert(
            group.to_string(),
            CachedSelection {
                resource: resource.clone(),
                selected_at: Instant::now(),
            },
        );
        debug!(group = %group, resource = %resource.id, "Active resource selected");
        Ok(resource)
    }

    /// Records that a call to `resource` of `group` failed.
    #[instrument(skip(self, resource), fields(resource = %resource.id))]
    pub async fn report_failure(&self, group: &str, resource: &Resource) {
        warn!(group = %group, "Resource reported unavailable");
        self.unhealthy
            .write()
            .await
            .insert((group.to_string(), resource.id.clone()), Instant::now());

        let mut active = self.active.write().await;
        if active
            .get(group)
            .is_some_and(|cached| cached.resource.id == resource.id)
        {
            active.remove(group);
        }
    }

    /// Probes healthy endpoints first, then recently failed ones; the first
    /// that answers wins.
    async fn evaluate(&self, group: &ResourceGroup) -> ResourceResult<Resource> {
        let (healthy, suspect): (Vec<&Resource>, Vec<&Resource>) = {
            let unhealthy = self.unhealthy.read().await;
            group.resources.iter().partition(|resource| {
                unhealthy
                    .get(&(group.name.clone(), resource.id.clone()))
                    .map_or(true, |marked| marked.elapsed() >= self.refresh)
            })
        };

        for resource in healthy.into_iter().chain(suspect) {
            if self.probe.is_available(resource).await {
                self.unhealthy
                    .write()
                    .await
                    .remove(&(group.name.clone(), resource.id.clone()));
                return Ok(resource.clone());
            }
            debug!(group = %group.name, resource = %resource.id, "Resource probe failed");
        }

        info!(group = %group.name, "No resource of the group is available");
        Err(ResourceError::NoActiveResource(group.name.clone()))
    }
}

impl std::fmt::Debug for ResourceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSelector")
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}
