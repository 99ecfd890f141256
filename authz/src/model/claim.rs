//! Claims: atomic permission grants.
//!
//! A claim grants (or denies) `action` on `resource` inside a realm, optionally
//! gated by a condition expression. Both `action` and `resource` are matched
//! first literally, then as an anchored regular expression. A pattern that
//! does not compile simply never matches.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::unique::Keyed;
use crate::types::Effect;

/// Separator used when composing unique keys; never valid in identifiers.
pub(crate) const KEY_SEPARATOR: char = '\u{1f}';

/// Upper bound on distinct cached patterns before the cache is reset.
const PATTERN_CACHE_LIMIT: usize = 4096;

/// Compiled patterns, `None` for patterns that failed to compile.
static PATTERN_CACHE: Lazy<RwLock<HashMap<String, Option<Arc<Regex>>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// An atomic permission grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the realm this claim belongs to.
    pub realm: String,

    /// Literal action, anchored regex such as `(read|modify)`, or `*`.
    pub action: String,

    /// Literal resource, anchored regex, or `*`.
    pub resource: String,

    /// Optional boolean expression evaluated against the request context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default)]
    pub effect: Effect,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Claim {
    /// Creates an unconditional `allow` claim.
    pub fn new(
        realm: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            realm: realm.into(),
            action: action.into(),
            resource: resource.into(),
            condition: None,
            effect: Effect::Allow,
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    pub fn with_validity(
        mut self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    /// `true` when the condition is present and not blank.
    pub fn has_condition(&self) -> bool {
        self.condition
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    /// Does this claim cover `action` on `resource`?
    pub fn implies(&self, action: &str, resource: &str) -> bool {
        pattern_matches(&self.action, action) && pattern_matches(&self.resource, resource)
    }

    /// Is `at` inside the claim's validity window?
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        within_window(self.start_date, self.end_date, at)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.realm.trim().is_empty() {
            return Err("claim realm is required".to_string());
        }
        if self.action.trim().is_empty() {
            return Err("claim action is required".to_string());
        }
        if self.resource.trim().is_empty() {
            return Err("claim resource is required".to_string());
        }
        Ok(())
    }
}

impl Keyed for Claim {
    fn unique_key(&self) -> String {
        format!(
            "{realm}{sep}{action}{sep}{resource}{sep}{condition}",
            realm = self.realm,
            action = self.action,
            resource = self.resource,
            condition = self.condition.as_deref().unwrap_or(""),
            sep = KEY_SEPARATOR,
        )
    }
}

pub(crate) fn within_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> bool {
    start.map_or(true, |s| s <= at) && end.map_or(true, |e| at <= e)
}

/// Literal equality, `*` wildcard, then anchored regex.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == value || pattern == "*" {
        return true;
    }
    match compiled(pattern) {
        Some(regex) => regex.is_match(value),
        None => false,
    }
}

fn compiled(pattern: &str) -> Option<Arc<Regex>> {
    if let Ok(cache) = PATTERN_CACHE.read() {
        if let Some(entry) = cache.get(pattern) {
            return entry.clone();
        }
    }

    let entry = match Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(regex) => Some(Arc::new(regex)),
        Err(e) => {
            debug!("Pattern '{}' is not a valid regex, literal match only: {}", pattern, e);
            None
        }
    };

    if let Ok(mut cache) = PATTERN_CACHE.write() {
        if cache.len() >= PATTERN_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(pattern.to_string(), entry.clone());
    }

    entry
}
