//! Domain model: realms, claims, roles, principals and limits.
//!
//! Every collection on these entities is a [`UniqueSet`], so the same claim
//! reached through several roles (or both directly and through a role) is
//! counted once and iteration order is deterministic.

pub mod claim;
pub mod limit;
pub mod principal;
pub mod realm;
pub mod role;
pub mod unique;

pub use claim::Claim;
pub use limit::Limit;
pub use principal::Principal;
pub use realm::Realm;
pub use role::Role;
pub use unique::{Keyed, UniqueSet};
