//! Tree-walking interpreter for parsed conditions.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

use super::parser::{parse, BinaryOp, Expr, UnaryOp};
use super::transform::{Transform, TransformRegistry};
use super::value;
use super::{ConditionEvaluator, EvaluationContext};
use crate::error::ConditionError;
use crate::types::Context;

const AST_CACHE_LIMIT: usize = 4096;

/// The default [`ConditionEvaluator`]: a small expression language with
/// comparisons, boolean logic, arithmetic, member access and `|transforms`.
///
/// Parsed expressions are cached by source text, so evaluating the same
/// claim condition repeatedly only parses it once.
pub struct ExpressionEvaluator {
    transforms: TransformRegistry,
    cache: RwLock<HashMap<String, Arc<Expr>>>,
}

impl ExpressionEvaluator {
    /// An evaluator with the builtin date transforms registered.
    pub fn new() -> Self {
        Self {
            transforms: TransformRegistry::with_builtins(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a transform available to every evaluation.
    pub fn register(&mut self, name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.register(name, transform);
    }

    pub fn with_transform(mut self, name: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        self.register(name, transform);
        self
    }

    /// Parses `source`, reusing a cached tree when there is one.
    pub fn compile(&self, source: &str) -> Result<Arc<Expr>, ConditionError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(expr) = cache.get(source) {
                return Ok(Arc::clone(expr));
            }
        }

        let expr = Arc::new(parse(source)?);
        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= AST_CACHE_LIMIT {
                cache.clear();
            }
            cache.insert(source.to_string(), Arc::clone(&expr));
        }
        Ok(expr)
    }

    /// Evaluates `source` to a value rather than a boolean.
    pub async fn evaluate_value(
        &self,
        source: &str,
        context: &EvaluationContext,
    ) -> Result<Value, ConditionError> {
        let expr = self.compile(source)?;
        let interpreter = Interpreter {
            vars: &context.vars,
            local: &context.transforms,
            global: &self.transforms,
        };
        interpreter.eval(&expr).await
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConditionEvaluator for ExpressionEvaluator {
    async fn evaluate(
        &self,
        condition: &str,
        context: &EvaluationContext,
    ) -> Result<bool, ConditionError> {
        let result = self.evaluate_value(condition, context).await?;
        trace!(condition, result = %result, "Condition evaluated");
        Ok(value::is_truthy(&result))
    }
}

struct Interpreter<'a> {
    vars: &'a Context,
    local: &'a TransformRegistry,
    global: &'a TransformRegistry,
}

impl<'a> Interpreter<'a> {
    fn eval(&'a self, expr: &'a Expr) -> BoxFuture<'a, Result<Value, ConditionError>> {
        async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::Identifier(name) => Ok(self.vars.get(name).cloned().unwrap_or(Value::Null)),
                Expr::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Expr::Member(target, name) => {
                    let target = self.eval(target).await?;
                    Ok(member(&target, name))
                }
                Expr::Index(target, index) => {
                    let target = self.eval(target).await?;
                    let index = self.eval(index).await?;
                    Ok(element(&target, &index))
                }
                Expr::Unary(op, operand) => {
                    let operand = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!value::is_truthy(&operand))),
                        UnaryOp::Neg => value::arithmetic('-', &Value::from(0), &operand),
                    }
                }
                Expr::Binary(op, left, right) => self.binary(*op, left, right).await,
                Expr::Conditional(condition, then, otherwise) => {
                    if value::is_truthy(&self.eval(condition).await?) {
                        self.eval(then).await
                    } else {
                        self.eval(otherwise).await
                    }
                }
                Expr::Transform { input, name, args } => {
                    let transform = self
                        .local
                        .get(name)
                        .or_else(|| self.global.get(name))
                        .ok_or_else(|| ConditionError::UnknownTransform(name.clone()))?;
                    let input = self.eval(input).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg).await?);
                    }
                    transform.apply(input, values).await
                }
            }
        }
        .boxed()
    }

    async fn binary(
        &'a self,
        op: BinaryOp,
        left: &'a Expr,
        right: &'a Expr,
    ) -> Result<Value, ConditionError> {
        let lhs = self.eval(left).await?;

        // Short-circuit before touching the right side, which may have
        // side effects through a transform.
        match op {
            BinaryOp::And if !value::is_truthy(&lhs) => return Ok(Value::Bool(false)),
            BinaryOp::Or if value::is_truthy(&lhs) => return Ok(Value::Bool(true)),
            _ => {}
        }

        let rhs = self.eval(right).await?;
        let ordered = |accept: fn(Ordering) -> bool| -> Result<Value, ConditionError> {
            Ok(Value::Bool(
                value::compare(&lhs, &rhs)?.map_or(false, accept),
            ))
        };

        match op {
            BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(value::is_truthy(&rhs))),
            BinaryOp::Eq => Ok(Value::Bool(value::loose_eq(&lhs, &rhs))),
            BinaryOp::NotEq => Ok(Value::Bool(!value::loose_eq(&lhs, &rhs))),
            BinaryOp::Lt => ordered(|o| o == Ordering::Less),
            BinaryOp::LtEq => ordered(|o| o != Ordering::Greater),
            BinaryOp::Gt => ordered(|o| o == Ordering::Greater),
            BinaryOp::GtEq => ordered(|o| o != Ordering::Less),
            BinaryOp::In => Ok(Value::Bool(value::contains(&lhs, &rhs)?)),
            BinaryOp::Add => value::add(&lhs, &rhs),
            BinaryOp::Sub => value::arithmetic('-', &lhs, &rhs),
            BinaryOp::Mul => value::arithmetic('*', &lhs, &rhs),
            BinaryOp::Div => value::arithmetic('/', &lhs, &rhs),
            BinaryOp::Rem => value::arithmetic('%', &lhs, &rhs),
        }
    }
}

fn member(target: &Value, name: &str) -> Value {
    match target {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) if name == "length" => Value::from(items.len()),
        Value::String(s) if name == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn element(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Array(items), _) => value::as_number(index)
            .filter(|n| *n >= 0.0 && n.fract() == 0.0)
            .and_then(|n| items.get(n as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), key) => map
            .get(value::display(key).as_str())
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn context(vars: Value) -> EvaluationContext {
        match vars {
            Value::Object(map) => EvaluationContext::new(map),
            _ => EvaluationContext::default(),
        }
    }

    async fn eval(source: &str, vars: Value) -> Result<bool, ConditionError> {
        ExpressionEvaluator::new()
            .evaluate(source, &context(vars))
            .await
    }

    #[tokio::test]
    async fn test_region_condition() {
        let vars = json!({"employeeRegion": "MIDWEST"});
        assert!(eval("employeeRegion == 'MIDWEST'", vars.clone()).await.unwrap());
        assert!(!eval("employeeRegion == 'EAST'", vars).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_variable_is_null() {
        assert!(!eval("employeeRegion == 'MIDWEST'", json!({})).await.unwrap());
        assert!(!eval("accountBalance < 10000", json!({})).await.unwrap());
        assert!(eval("missing == null", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_numeric_comparison() {
        assert!(eval("accountBalance < 10000", json!({"accountBalance": 500})).await.unwrap());
        assert!(!eval("accountBalance < 10000", json!({"accountBalance": 20000}))
            .await
            .unwrap());
        assert!(eval("accountBalance < 10000", json!({"accountBalance": "500"}))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_limit_keys() {
        let vars = json!({"Report_value": 1, "Report_maxAllowed": 2});
        assert!(eval("Report_value < Report_maxAllowed", vars).await.unwrap());
    }

    #[tokio::test]
    async fn test_logic_and_arithmetic() {
        let vars = json!({"a": 2, "b": 3, "tags": ["gold", "silver"], "user": {"age": 40}});
        assert!(eval("a + b == 5 && a * b > 5", vars.clone()).await.unwrap());
        assert!(eval("!(a > b) or false", vars.clone()).await.unwrap());
        assert!(eval("'gold' in tags", vars.clone()).await.unwrap());
        assert!(eval("user.age >= 18", vars.clone()).await.unwrap());
        assert!(eval("tags[1] == 'silver'", vars.clone()).await.unwrap());
        assert!(eval("tags.length == 2", vars.clone()).await.unwrap());
        assert!(eval("a > b ? false : true", vars.clone()).await.unwrap());
        assert!(eval("-a < 0", vars).await.unwrap());
    }

    #[tokio::test]
    async fn test_truthiness_of_result() {
        assert!(!eval("flag", json!({"flag": "false"})).await.unwrap());
        assert!(eval("flag", json!({"flag": ""})).await.unwrap());
        assert!(!eval("0", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_errors() {
        assert!(matches!(
            eval("a ==", json!({})).await,
            Err(ConditionError::Parse { .. })
        ));
        assert!(matches!(
            eval("a|nope", json!({})).await,
            Err(ConditionError::UnknownTransform(name)) if name == "nope"
        ));
        assert!(matches!(
            eval("1 / 0", json!({})).await,
            Err(ConditionError::Evaluation(_))
        ));
    }

    #[tokio::test]
    async fn test_builtin_date_transform() {
        let vars = json!({"hired": "2001-04-01"});
        assert!(eval("hired|olderThan('2010-01-01')", vars.clone()).await.unwrap());
        assert!(!eval("hired|newerThan('2010-01-01')", vars).await.unwrap());
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Transform for Counter {
        async fn apply(&self, _input: Value, _args: Vec<Value>) -> Result<Value, ConditionError> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Value::Bool(true))
        }
    }

    #[tokio::test]
    async fn test_short_circuit_skips_transform() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let evaluator = ExpressionEvaluator::new();
        let context = EvaluationContext::default().with_transform("count", counter.clone());

        assert!(!evaluator.evaluate("false && 'x'|count", &context).await.unwrap());
        assert!(evaluator.evaluate("true || 'x'|count", &context).await.unwrap());
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 0);

        assert!(evaluator.evaluate("true && 'x'|count", &context).await.unwrap());
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_transform_shadows_global() {
        let mut evaluator = ExpressionEvaluator::new();
        let mut global = TransformRegistry::new();
        global.register_fn("flag", |_, _| Ok(Value::Bool(false)));
        evaluator.register("flag", global.get("flag").unwrap());

        let context = EvaluationContext::default();
        assert!(!evaluator.evaluate("1|flag", &context).await.unwrap());

        let mut local = TransformRegistry::new();
        local.register_fn("flag", |_, _| Ok(Value::Bool(true)));
        let context = EvaluationContext::default().with_transform("flag", local.get("flag").unwrap());
        assert!(evaluator.evaluate("1|flag", &context).await.unwrap());
    }

    #[test]
    fn test_compile_caches() {
        let evaluator = ExpressionEvaluator::new();
        let first = evaluator.compile("a == 1").unwrap();
        let second = evaluator.compile("a == 1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
