//! Reconciler tying the engine together.
//!
//! The [`Reconciler`] owns a validated graph, the type registry and a state
//! store. It plans against the recorded state and applies plans under the
//! store's run lock.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Manifest, build_declarations};
use crate::error::{InfragraphError, ReconcileError, Result};
use crate::executor::{ApplyResult, Executor, ExecutorConfig};
use crate::graph::{GraphBuilder, ResourceGraph};
use crate::planner::{ChangePlan, Planner};
use crate::provider::{ProviderApi, ResourceTypeRegistry};
use crate::state::{LockInfo, StateStore, generate_holder_id};

/// Plans and applies changes for one resource graph.
pub struct Reconciler {
    graph: ResourceGraph,
    registry: ResourceTypeRegistry,
    store: Arc<dyn StateStore>,
    config: ExecutorConfig,
    cancel: CancellationToken,
    holder: String,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        graph: ResourceGraph,
        registry: ResourceTypeRegistry,
        store: Arc<dyn StateStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            graph,
            registry,
            store,
            config,
            cancel: CancellationToken::new(),
            holder: generate_holder_id(),
        }
    }

    /// Builds a reconciler for a loaded manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the declarations are invalid or the graph has a
    /// cycle. Nothing remote is touched.
    pub fn from_manifest(
        manifest: &Manifest,
        api: &Arc<dyn ProviderApi>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let declarations = build_declarations(manifest)?;
        let graph = GraphBuilder::build(&declarations)?;
        let registry = ResourceTypeRegistry::from_manifest(manifest, api);
        debug!(
            "Built graph of {} resources for {}",
            graph.len(),
            manifest.qualified_name()
        );
        Ok(Self::new(
            graph,
            registry,
            store,
            ExecutorConfig::from_settings(&manifest.settings),
        ))
    }

    /// Replaces the executor tuning.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `cancel` to stop applies early.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the name recorded as the run lock holder.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Returns the resource graph.
    #[must_use]
    pub const fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Returns the type registry.
    #[must_use]
    pub const fn registry(&self) -> &ResourceTypeRegistry {
        &self.registry
    }

    /// Plans the changes that bring recorded state in line with the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or planning fails.
    pub async fn plan(&self) -> Result<ChangePlan> {
        Planner::new(&self.registry)
            .plan_with_store(&self.graph, self.store.as_ref())
            .await
    }

    /// Plans the deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or planning fails.
    pub async fn plan_destroy(&self) -> Result<ChangePlan> {
        let records = self.store.load().await?;
        Planner::new(&self.registry).plan_destroy(&records)
    }

    /// Acquires the store's run lock for this reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StateError::LockedByOther`] if another run
    /// holds it.
    pub async fn lock(&self) -> Result<LockInfo> {
        self.store.acquire_lock(&self.holder).await
    }

    /// Releases `lock`. A failed release is logged, not returned.
    pub async fn unlock(&self, lock: &LockInfo) {
        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {}", lock.lock_id, e);
        }
    }

    /// Applies `plan` without touching the run lock.
    ///
    /// The caller must hold the lock from [`Self::lock`], ideally since
    /// before `plan` was computed.
    pub async fn apply_locked(&self, plan: &ChangePlan) -> ApplyResult {
        Executor::new(&self.registry, Arc::clone(&self.store), self.config.clone())
            .with_cancellation(self.cancel.clone())
            .apply(plan)
            .await
    }

    /// Applies `plan` while holding the run lock.
    ///
    /// The lock is released whatever the outcome. A plan without changes is
    /// applied without taking the lock. Actions whose record changed since
    /// `plan` was computed fail instead of overwriting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired. Action failures are
    /// reported in the [`ApplyResult`], not as an error.
    pub async fn apply(&self, plan: &ChangePlan) -> Result<ApplyResult> {
        if !plan.has_changes() {
            info!("No changes required - state is converged");
            return Ok(self.apply_locked(plan).await);
        }

        let lock = self.lock().await?;
        let result = self.apply_locked(plan).await;
        self.unlock(&lock).await;
        Ok(result)
    }

    /// Plans and applies under one hold of the run lock.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ApplyIncomplete`] if any action failed or
    /// was skipped, and any planning or locking error.
    pub async fn reconcile(&self) -> Result<ApplyResult> {
        let lock = self.lock().await?;
        let result = self.plan_and_apply_locked().await;
        self.unlock(&lock).await;

        let result = result?;
        ensure_complete(&result)?;
        Ok(result)
    }

    async fn plan_and_apply_locked(&self) -> Result<ApplyResult> {
        let plan = self.plan().await?;
        info!("{}", plan.summary().line());
        Ok(self.apply_locked(&plan).await)
    }
}

/// Fails unless every action of `result` was applied or unchanged.
///
/// # Errors
///
/// Returns [`ReconcileError::ApplyIncomplete`] with the failure counts.
pub fn ensure_complete(result: &ApplyResult) -> Result<()> {
    if result.is_success() {
        return Ok(());
    }
    Err(InfragraphError::Reconcile(ReconcileError::ApplyIncomplete {
        failed: result.failed(),
        skipped: result.skipped(),
    }))
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("resources", &self.graph.len())
            .field("types", &self.registry.type_names())
            .field("store", &self.store.backend_type())
            .field("config", &self.config)
            .field("holder", &self.holder)
            .finish()
    }
}
