//! Request and decision types shared by every layer of the engine.
//!
//! # Security Considerations
//!
//! - A [`SecurityAccessRequest`] is built per check from an authenticated
//!   caller. The realm and principal name must come from the session, never
//!   from untrusted request data.
//! - The request context is caller-supplied. Principal properties and limit
//!   state are merged over it, so a caller cannot spoof server-side facts.
//! - [`Effect::DefaultDeny`] is the answer when nothing grants access. It is
//!   distinct from an explicit [`Effect::Deny`] claim and both must be treated
//!   as "no access" by enforcement points.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form attributes supplied with a request or stored on a principal.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// The outcome attached to a claim, and the outcome of a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Effect {
    /// Access is granted.
    #[default]
    Allow,

    /// Access is explicitly refused.
    Deny,

    /// Nothing granted access.
    DefaultDeny,
}

impl Effect {
    /// `true` only for [`Effect::Allow`].
    pub fn is_allowed(self) -> bool {
        self == Effect::Allow
    }

    /// The canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
            Effect::DefaultDeny => "defaultDeny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            "defaultdeny" | "default_deny" => Ok(Effect::DefaultDeny),
            other => Err(format!("unknown effect '{}'", other)),
        }
    }
}

/// One authorization question: may `principal_name` in `realm_name` perform
/// `action` on `resource`, given `context`?
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAccessRequest {
    pub realm_name: String,
    pub principal_name: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: Context,
}

impl SecurityAccessRequest {
    /// Creates a request with an empty context.
    pub fn new(
        realm_name: impl Into<String>,
        principal_name: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            realm_name: realm_name.into(),
            principal_name: principal_name.into(),
            action: action.into(),
            resource: resource.into(),
            context: Context::new(),
        }
    }

    /// Replaces the request context.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Adds a single context attribute.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Checks that every identifying field is non-empty.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("realmName", &self.realm_name),
            ("principalName", &self.principal_name),
            ("action", &self.action),
            ("resource", &self.resource),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(format!("{} is empty", name));
            }
        }

        Ok(())
    }
}

impl fmt::Display for SecurityAccessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} {}",
            self.realm_name, self.principal_name, self.action, self.resource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_defaults_to_allow() {
        assert_eq!(Effect::default(), Effect::Allow);
    }

    #[test]
    fn test_effect_parsing() {
        assert_eq!("allow".parse::<Effect>().unwrap(), Effect::Allow);
        assert_eq!("DENY".parse::<Effect>().unwrap(), Effect::Deny);
        assert_eq!("defaultDeny".parse::<Effect>().unwrap(), Effect::DefaultDeny);
        assert_eq!("default_deny".parse::<Effect>().unwrap(), Effect::DefaultDeny);
        assert!("maybe".parse::<Effect>().is_err());
    }

    #[test]
    fn test_effect_serialization() {
        assert_eq!(
            serde_json::to_string(&Effect::DefaultDeny).unwrap(),
            "\"defaultDeny\""
        );
        let effect: Effect = serde_json::from_str("\"deny\"").unwrap();
        assert_eq!(effect, Effect::Deny);
    }

    #[test]
    fn test_request_validation() {
        let request = SecurityAccessRequest::new("banking", "tom", "read", "DepositAccount");
        assert!(request.validate().is_ok());

        let request = SecurityAccessRequest::new("banking", "", "read", "DepositAccount");
        assert_eq!(request.validate().unwrap_err(), "principalName is empty");

        let request = SecurityAccessRequest::new("banking", "tom", " ", "DepositAccount");
        assert_eq!(request.validate().unwrap_err(), "action is empty");
    }

    #[test]
    fn test_request_context_builder() {
        let request = SecurityAccessRequest::new("banking", "tom", "read", "DepositAccount")
            .with_attribute("employeeRegion", "MIDWEST")
            .with_attribute("accountBalance", 500);

        assert_eq!(request.context["employeeRegion"], "MIDWEST");
        assert_eq!(request.context["accountBalance"], 500);
        assert_eq!(request.to_string(), "banking/tom read DepositAccount");
    }
}
