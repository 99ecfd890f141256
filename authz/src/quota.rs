//! The `incr` transform: consume one unit of a principal's quota from inside
//! a condition, e.g. `'Report'|incr` or `'Report'|incr('daily')`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::condition::{value, Transform};
use crate::error::{ConditionError, PersistenceError};
use crate::model::Principal;
use crate::repository::PrincipalRepository;

/// `incr` bound to one principal for the duration of one check.
///
/// The input is the limit's resource name. An optional first argument picks
/// the limit type; otherwise the principal's first limit on that resource is
/// used, falling back to `default_limit_type`. Evaluates to `true` when the
/// increment happened and `false` when the quota is exhausted or missing.
pub struct QuotaTransform {
    principal: Principal,
    principals: Arc<dyn PrincipalRepository>,
    default_limit_type: String,
}

impl QuotaTransform {
    pub fn new(
        principal: Principal,
        principals: Arc<dyn PrincipalRepository>,
        default_limit_type: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            principals,
            default_limit_type: default_limit_type.into(),
        }
    }

    fn limit_type_for(&self, resource: &str, args: &[Value]) -> String {
        match args.first() {
            Some(arg) if !arg.is_null() => value::display(arg),
            _ => self
                .principal
                .find_limit(None, resource)
                .map(|l| l.limit_type.clone())
                .unwrap_or_else(|| self.default_limit_type.clone()),
        }
    }
}

#[async_trait]
impl Transform for QuotaTransform {
    async fn apply(&self, input: Value, args: Vec<Value>) -> Result<Value, ConditionError> {
        let resource = match &input {
            Value::String(s) if !s.is_empty() => s.clone(),
            other => {
                return Err(ConditionError::Evaluation(format!(
                    "incr expects a resource name, found {}",
                    value::type_name(other)
                )))
            }
        };
        let limit_type = self.limit_type_for(&resource, &args);

        match self
            .principals
            .increment(&self.principal, &limit_type, &resource)
            .await
        {
            Ok(limit) => {
                debug!(
                    principal = %self.principal.principal_name,
                    resource = %resource,
                    value = limit.value,
                    max_allowed = limit.max_allowed,
                    "Quota consumed"
                );
                Ok(Value::Bool(true))
            }
            Err(PersistenceError::LimitExhausted { .. }) => {
                debug!(
                    principal = %self.principal.principal_name,
                    resource = %resource,
                    "Quota exhausted"
                );
                Ok(Value::Bool(false))
            }
            Err(PersistenceError::NotFound { entity, key }) => {
                warn!(
                    principal = %self.principal.principal_name,
                    "incr on {} failed: {} {} not found",
                    resource, entity, key
                );
                Ok(Value::Bool(false))
            }
            Err(e) => Err(ConditionError::Persistence(e)),
        }
    }
}
