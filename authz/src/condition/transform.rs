//! Named value transforms invoked with `value|name(args)`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConditionError;

/// A function applied to the value on the left of a `|`.
///
/// Transforms are async so they can reach storage (see the quota transform).
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(&self, input: Value, args: Vec<Value>) -> Result<Value, ConditionError>;
}

/// Adapter turning a plain closure into a [`Transform`].
struct FnTransform<F>(F);

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(Value, Vec<Value>) -> Result<Value, ConditionError> + Send + Sync,
{
    async fn apply(&self, input: Value, args: Vec<Value>) -> Result<Value, ConditionError> {
        (self.0)(input, args)
    }
}

/// Transforms by name.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The always-available transforms: `olderThan` and `newerThan`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn("olderThan", |input, args| {
            date_relation(input, args, |value, reference| value < reference)
        });
        registry.register_fn("newerThan", |input, args| {
            date_relation(input, args, |value, reference| value > reference)
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.insert(name.into(), transform);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, Vec<Value>) -> Result<Value, ConditionError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnTransform(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &names)
            .finish()
    }
}

/// Compares the input date with the first argument, or with now when no
/// argument is given. A null input yields `false`.
fn date_relation(
    input: Value,
    args: Vec<Value>,
    relation: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> Result<Value, ConditionError> {
    if input.is_null() {
        return Ok(Value::Bool(false));
    }
    let value = parse_date(&input)?;
    let reference = match args.first() {
        Some(arg) if !arg.is_null() => parse_date(arg)?,
        _ => Utc::now(),
    };
    Ok(Value::Bool(relation(value, reference)))
}

/// Accepts RFC 3339 timestamps, `YYYY-MM-DDTHH:MM:SS` (taken as UTC),
/// plain `YYYY-MM-DD` dates (midnight UTC) and epoch milliseconds.
pub fn parse_date(value: &Value) -> Result<DateTime<Utc>, ConditionError> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
                return Ok(dt.and_utc());
            }
            if let Some(dt) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
            {
                return Ok(dt.and_utc());
            }
            Err(ConditionError::Evaluation(format!(
                "'{}' is not a recognised date",
                text
            )))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| ConditionError::Evaluation(format!("{} is not a valid timestamp", n))),
        other => Err(ConditionError::Evaluation(format!(
            "expected a date, found {}",
            other
        ))),
    }
}
