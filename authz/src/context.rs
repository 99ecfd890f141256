//! Explicit wiring of repositories and the condition evaluator.

use std::sync::Arc;
use tracing::debug;

use crate::condition::{ConditionEvaluator, ExpressionEvaluator};
use crate::error::Result;
use crate::repository::{
    ClaimRepository, InMemoryStore, PrincipalRepository, RealmRepository, RoleRepository,
};

/// Everything a [`SecurityManager`](crate::SecurityManager) or fixture
/// loader needs, built once at startup and closed on shutdown.
#[derive(Clone)]
pub struct AuthzContext {
    pub realms: Arc<dyn RealmRepository>,
    pub claims: Arc<dyn ClaimRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub principals: Arc<dyn PrincipalRepository>,
    pub evaluator: Arc<dyn ConditionEvaluator>,
}

impl AuthzContext {
    pub fn new(
        realms: Arc<dyn RealmRepository>,
        claims: Arc<dyn ClaimRepository>,
        roles: Arc<dyn RoleRepository>,
        principals: Arc<dyn PrincipalRepository>,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        Self {
            realms,
            claims,
            roles,
            principals,
            evaluator,
        }
    }

    /// Uses one store for all four repositories and the default
    /// [`ExpressionEvaluator`].
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RealmRepository + ClaimRepository + RoleRepository + PrincipalRepository + 'static,
    {
        Self {
            realms: store.clone(),
            claims: store.clone(),
            roles: store.clone(),
            principals: store,
            evaluator: Arc::new(ExpressionEvaluator::new()),
        }
    }

    /// A fresh, empty in-memory context.
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Releases the storage handles held by every repository.
    pub async fn close(&self) -> Result<()> {
        debug!("Closing authorization context");
        self.realms.close().await?;
        self.claims.close().await?;
        self.roles.close().await?;
        self.principals.close().await
    }
}
