//! Condition evaluation for conditional claims.
//!
//! A claim condition is an expression over the evaluation context, e.g.
//! `employeeRegion == 'MIDWEST' && accountBalance < 10000`. Values can be
//! piped through named transforms (`'Report'|incr`,
//! `hireDate|olderThan('2020-01-01')`).
//!
//! [`ConditionEvaluator`] is the seam the security manager depends on;
//! [`ExpressionEvaluator`] is the bundled implementation.

mod engine;
mod lexer;
mod parser;
mod transform;
pub mod value;

pub use engine::ExpressionEvaluator;
pub use parser::{parse, BinaryOp, Expr, UnaryOp};
pub use transform::{parse_date, Transform, TransformRegistry};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ConditionError;
use crate::types::Context;

/// Evaluates a condition string against a context.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// `Ok(true)` when the condition holds. Parse and evaluation failures
    /// are errors, which callers treat as "does not hold".
    async fn evaluate(
        &self,
        condition: &str,
        context: &EvaluationContext,
    ) -> Result<bool, ConditionError>;
}

/// Variables for one evaluation, plus transforms bound to this evaluation
/// only (such as `incr`, which closes over the principal being checked).
/// These shadow evaluator-wide transforms with the same name.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub vars: Context,
    pub transforms: TransformRegistry,
}

impl EvaluationContext {
    pub fn new(vars: Context) -> Self {
        Self {
            vars,
            transforms: TransformRegistry::new(),
        }
    }

    pub fn with_transform(mut self, name: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        self.transforms.register(name, transform);
        self
    }

    /// Overlays `other` onto the variables; keys in `other` win.
    pub fn merge(&mut self, other: Context) {
        self.vars.extend(other);
    }
}
