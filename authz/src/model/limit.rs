//! Usage quotas attached to a principal.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::KEY_SEPARATOR;
use super::unique::Keyed;
use crate::error::PersistenceError;
use crate::types::Context;

/// A counter that may grow up to `max_allowed` until `expiration_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub limit_type: String,

    pub resource: String,

    pub max_allowed: i64,

    /// Current usage.
    #[serde(default)]
    pub value: i64,

    /// Last day (inclusive, UTC) on which the limit is usable.
    pub expiration_date: NaiveDate,

    /// Owning principal, set by the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
}

impl Limit {
    pub fn new(
        limit_type: impl Into<String>,
        resource: impl Into<String>,
        max_allowed: i64,
        expiration_date: NaiveDate,
    ) -> Self {
        Self {
            id: None,
            limit_type: limit_type.into(),
            resource: resource.into(),
            max_allowed,
            value: 0,
            expiration_date,
            principal_id: None,
        }
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    /// The instant the limit stops being valid: 23:59:59 UTC on the expiration date.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
        self.expiration_date.and_time(end_of_day).and_utc()
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.value <= self.max_allowed && at <= self.expires_at()
    }

    /// `value <= max_allowed` and not yet expired.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Consumes one unit, refusing when the limit is already at its maximum.
    ///
    /// Repositories perform the same check atomically against storage; this
    /// is the in-value version of that rule.
    pub fn increment(&mut self) -> Result<(), PersistenceError> {
        if self.value >= self.max_allowed {
            return Err(self.exhausted());
        }
        self.value += 1;
        Ok(())
    }

    pub(crate) fn exhausted(&self) -> PersistenceError {
        PersistenceError::LimitExhausted {
            limit_type: self.limit_type.clone(),
            resource: self.resource.clone(),
            value: self.value,
            max_allowed: self.max_allowed,
        }
    }

    /// Writes `<resource>_value`, `<resource>_maxAllowed` and
    /// `<resource>_expirationDate` into `context`.
    pub fn write_context(&self, context: &mut Context) {
        context.insert(format!("{}_value", self.resource), self.value.into());
        context.insert(
            format!("{}_maxAllowed", self.resource),
            self.max_allowed.into(),
        );
        context.insert(
            format!("{}_expirationDate", self.resource),
            self.expiration_date.to_string().into(),
        );
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.limit_type.trim().is_empty() {
            return Err("limit type is required".to_string());
        }
        if self.resource.trim().is_empty() {
            return Err("limit resource is required".to_string());
        }
        if self.max_allowed < 0 || self.value < 0 {
            return Err(format!(
                "limit {} must have non-negative maxAllowed and value",
                self.resource
            ));
        }
        Ok(())
    }
}

impl Keyed for Limit {
    fn unique_key(&self) -> String {
        format!("{}{}{}", self.limit_type, KEY_SEPARATOR, self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tomorrow() -> NaiveDate {
        (Utc::now() + Duration::days(1)).date_naive()
    }

    #[test]
    fn test_increment_until_exhausted() {
        let mut limit = Limit::new("quota", "Report", 2, tomorrow());

        assert!(limit.increment().is_ok());
        assert_eq!(limit.value, 1);
        assert!(limit.increment().is_ok());
        assert_eq!(limit.value, 2);

        let err = limit.increment().unwrap_err();
        assert!(matches!(err, PersistenceError::LimitExhausted { value: 2, .. }));
        assert_eq!(limit.value, 2);
    }

    #[test]
    fn test_full_limit_is_still_valid() {
        let limit = Limit::new("quota", "Report", 2, tomorrow()).with_value(2);
        assert!(limit.is_valid());
    }

    #[test]
    fn test_expired_limit_is_invalid() {
        let yesterday = (Utc::now() - Duration::days(1)).date_naive();
        let limit = Limit::new("quota", "Report", 2, yesterday).with_value(2);
        assert!(!limit.is_valid());
    }

    #[test]
    fn test_expiration_uses_end_of_day() {
        let date = NaiveDate::from_ymd_opt(2030, 6, 15).unwrap();
        let limit = Limit::new("quota", "Report", 5, date);

        let late_same_day = date.and_hms_opt(23, 59, 0).unwrap().and_utc();
        let next_day = date.succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc();

        assert!(limit.is_valid_at(late_same_day));
        assert!(!limit.is_valid_at(next_day));
    }

    #[test]
    fn test_overrun_limit_is_invalid() {
        let limit = Limit::new("quota", "Report", 2, tomorrow()).with_value(3);
        assert!(!limit.is_valid());
    }

    #[test]
    fn test_context_entries() {
        let date = NaiveDate::from_ymd_opt(2030, 1, 31).unwrap();
        let limit = Limit::new("quota", "AnalysisReport", 10, date).with_value(4);
        let mut context = Context::new();
        limit.write_context(&mut context);

        assert_eq!(context["AnalysisReport_value"], 4);
        assert_eq!(context["AnalysisReport_maxAllowed"], 10);
        assert_eq!(context["AnalysisReport_expirationDate"], "2030-01-31");
    }

    #[test]
    fn test_deserialize_type_field() {
        let limit: Limit = serde_json::from_str(
            r#"{"type":"quota","resource":"Report","maxAllowed":2,"expirationDate":"2030-01-01"}"#,
        )
        .unwrap();
        assert_eq!(limit.limit_type, "quota");
        assert_eq!(limit.value, 0);
    }
}
