//! The access decision.
//!
//! [`SecurityManager::check`] loads the principal named by a request, walks
//! its effective claims in aggregation order (direct claims, then each role
//! depth-first through its parents) and folds every matching claim's effect
//! into one decision:
//!
//! - a claim without a condition applies its effect;
//! - a claim with a condition applies its effect only when the condition
//!   holds. A condition that fails to parse, errors or times out is treated
//!   as not holding and the check carries on;
//! - when nothing matched, the decision is [`Effect::DefaultDeny`].
//!
//! Conditions are awaited one at a time, so the outcome depends only on
//! claim order and never on which evaluation finishes first.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::condition::EvaluationContext;
use crate::context::AuthzContext;
use crate::error::{AuthzError, ConditionError, PersistenceError};
use crate::model::{Claim, Principal};
use crate::quota::QuotaTransform;
use crate::types::{Effect, SecurityAccessRequest};

/// How the effects of several matching claims combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    /// The last matching claim in aggregation order decides.
    #[default]
    LastMatchWins,

    /// Any matching deny wins; otherwise any matching allow.
    DenyOverrides,
}

impl DecisionStrategy {
    /// Folds one matched claim's effect into the running decision.
    pub fn combine(self, current: Effect, matched: Effect) -> Effect {
        match self {
            DecisionStrategy::LastMatchWins => matched,
            DecisionStrategy::DenyOverrides => {
                if precedence(matched) >= precedence(current) {
                    matched
                } else {
                    current
                }
            }
        }
    }

    /// `true` when no later claim can change `current`.
    fn is_final(self, current: Effect) -> bool {
        self == DecisionStrategy::DenyOverrides && current == Effect::Deny
    }
}

fn precedence(effect: Effect) -> u8 {
    match effect {
        Effect::DefaultDeny => 0,
        Effect::Allow => 1,
        Effect::Deny => 2,
    }
}

impl fmt::Display for DecisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionStrategy::LastMatchWins => f.write_str("last_match_wins"),
            DecisionStrategy::DenyOverrides => f.write_str("deny_overrides"),
        }
    }
}

impl FromStr for DecisionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "last_match_wins" => Ok(DecisionStrategy::LastMatchWins),
            "deny_overrides" => Ok(DecisionStrategy::DenyOverrides),
            other => Err(format!("unknown decision strategy '{}'", other)),
        }
    }
}

/// Tuning for [`SecurityManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityManagerConfig {
    /// Upper bound for a single condition evaluation.
    #[serde(rename = "evaluation_timeout_ms", with = "duration_ms")]
    pub evaluation_timeout: Duration,

    pub decision_strategy: DecisionStrategy,

    /// Limit type `incr` falls back to when the principal has no limit on
    /// the resource and the condition names none.
    pub quota_limit_type: String,
}

impl Default for SecurityManagerConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_secs(5),
            decision_strategy: DecisionStrategy::default(),
            quota_limit_type: "quota".to_string(),
        }
    }
}

impl SecurityManagerConfig {
    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    pub fn with_decision_strategy(mut self, strategy: DecisionStrategy) -> Self {
        self.decision_strategy = strategy;
        self
    }

    pub fn with_quota_limit_type(mut self, limit_type: impl Into<String>) -> Self {
        self.quota_limit_type = limit_type.into();
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Answers [`SecurityAccessRequest`]s against the repositories in an
/// [`AuthzContext`].
#[derive(Clone)]
pub struct SecurityManager {
    context: AuthzContext,
    config: SecurityManagerConfig,
}

impl SecurityManager {
    pub fn new(context: AuthzContext) -> Self {
        Self::with_config(context, SecurityManagerConfig::default())
    }

    pub fn with_config(context: AuthzContext, config: SecurityManagerConfig) -> Self {
        Self { context, config }
    }

    pub fn context(&self) -> &AuthzContext {
        &self.context
    }

    pub fn config(&self) -> &SecurityManagerConfig {
        &self.config
    }

    /// Decides `request` as of now.
    ///
    /// Returns an error only when the check itself cannot be carried out
    /// (bad request, unknown realm or principal, storage failure). A denial
    /// is a successful check.
    pub async fn check(&self, request: &SecurityAccessRequest) -> Result<Effect, AuthzError> {
        self.check_at(request, Utc::now()).await
    }

    /// Decides `request` with claim, role and limit validity taken at `at`.
    pub async fn check_at(
        &self,
        request: &SecurityAccessRequest,
        at: DateTime<Utc>,
    ) -> Result<Effect, AuthzError> {
        request.validate().map_err(AuthzError::InvalidRequest)?;

        debug!(
            realm = %request.realm_name,
            principal = %request.principal_name,
            action = %request.action,
            resource = %request.resource,
            "Checking access"
        );

        let principal = self.load_principal(request).await?;
        let claims = principal.active_claims_at(at);
        let strategy = self.config.decision_strategy;

        let mut effect = Effect::DefaultDeny;
        let mut evaluation: Option<EvaluationContext> = None;

        for claim in claims.iter() {
            if strategy.is_final(effect) {
                break;
            }
            if !claim.implies(&request.action, &request.resource) {
                continue;
            }

            if !claim.has_condition() {
                effect = strategy.combine(effect, claim.effect);
                continue;
            }

            let ctx = evaluation
                .get_or_insert_with(|| self.evaluation_context(request, &principal, at));
            if self.condition_holds(request, claim, ctx).await? {
                effect = strategy.combine(effect, claim.effect);
            }
        }

        info!(
            realm = %request.realm_name,
            principal = %request.principal_name,
            action = %request.action,
            resource = %request.resource,
            effect = %effect,
            "Access decision"
        );
        Ok(effect)
    }

    async fn load_principal(&self, request: &SecurityAccessRequest) -> Result<Principal, AuthzError> {
        let boxed = || Box::new(request.clone());
        let storage = |source: PersistenceError| AuthzError::Persistence {
            request: Box::new(request.clone()),
            source,
        };

        self.context
            .realms
            .find_by_name(&request.realm_name)
            .await
            .map_err(storage)?
            .ok_or_else(|| AuthzError::RealmNotFound { request: boxed() })?;

        let principal = self
            .context
            .principals
            .find_by_name(&request.realm_name, &request.principal_name)
            .await
            .map_err(storage)?
            .ok_or_else(|| AuthzError::PrincipalNotFound { request: boxed() })?;

        if principal.realm != request.realm_name {
            return Err(AuthzError::RealmMismatch {
                request: boxed(),
                principal_realm: principal.realm,
            });
        }

        Ok(principal)
    }

    /// Request context, then principal properties, then limit state; later
    /// sources overwrite earlier ones key by key.
    fn evaluation_context(
        &self,
        request: &SecurityAccessRequest,
        principal: &Principal,
        at: DateTime<Utc>,
    ) -> EvaluationContext {
        let mut ctx = EvaluationContext::new(request.context.clone());
        ctx.merge(principal.properties.clone());
        ctx.merge(principal.limit_context_at(at));

        let incr = QuotaTransform::new(
            principal.clone(),
            Arc::clone(&self.context.principals),
            self.config.quota_limit_type.clone(),
        );
        ctx.with_transform("incr", Arc::new(incr))
    }

    /// Evaluates one claim condition. Only storage failures and evaluator
    /// panics escape; everything else is "does not hold".
    async fn condition_holds(
        &self,
        request: &SecurityAccessRequest,
        claim: &Claim,
        ctx: &EvaluationContext,
    ) -> Result<bool, AuthzError> {
        let condition = claim.condition.as_deref().unwrap_or_default();
        let evaluation = AssertUnwindSafe(self.context.evaluator.evaluate(condition, ctx));
        let timeout = self.config.evaluation_timeout;

        let outcome = match tokio::time::timeout(timeout, evaluation.catch_unwind()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                return Err(AuthzError::Internal {
                    request: Box::new(request.clone()),
                    reason: format!("condition evaluator panicked on '{}'", condition),
                })
            }
            Err(_) => Err(ConditionError::Timeout(timeout)),
        };

        match outcome {
            Ok(holds) => {
                debug!(condition, holds, "Condition evaluated");
                Ok(holds)
            }
            Err(ConditionError::Persistence(PersistenceError::Storage(reason))) => {
                Err(AuthzError::Persistence {
                    request: Box::new(request.clone()),
                    source: PersistenceError::Storage(reason),
                })
            }
            Err(e) => {
                warn!(
                    principal = %request.principal_name,
                    condition,
                    "Condition treated as false: {}",
                    e
                );
                Ok(false)
            }
        }
    }
}
