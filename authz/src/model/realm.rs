use serde::{Deserialize, Serialize};

use super::unique::Keyed;

/// Tenant boundary for all RBAC data. Immutable once saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Realm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub realm_name: String,
}

impl Realm {
    pub fn new(realm_name: impl Into<String>) -> Self {
        Self {
            id: None,
            realm_name: realm_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.realm_name.trim().is_empty() {
            return Err("realmName is required".to_string());
        }
        Ok(())
    }
}

impl Keyed for Realm {
    fn unique_key(&self) -> String {
        self.realm_name.clone()
    }
}
