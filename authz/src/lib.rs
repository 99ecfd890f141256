//! Multi-tenant role-based authorization engine.
//!
//! Given a principal, an action, a resource and a runtime context, the
//! [`SecurityManager`] decides whether access is allowed, explicitly denied,
//! or falls through to the default deny.
//!
//! # Architecture Overview
//!
//! 1. **Request arrives** as a [`SecurityAccessRequest`]
//! 2. **Principal is loaded** with its roles resolved through their parents
//! 3. **Claims are aggregated**: direct claims, then role claims depth-first,
//!    de-duplicated by key
//! 4. **Matching claims are folded** in order; conditional claims are
//!    evaluated against the request context, principal properties and
//!    limit state
//! 5. **Decision** is returned: `allow`, `deny` or `defaultDeny`
//!
//! Quotas are consumed from inside conditions with the `incr` transform,
//! e.g. `'Report'|incr`.
//!
//! # Example
//!
//! ```rust
//! use authz::{AuthzContext, Claim, Effect, Principal, Realm, SecurityAccessRequest, SecurityManager};
//!
//! # tokio_test_block(async {
//! let ctx = AuthzContext::in_memory();
//! ctx.realms.save(Realm::new("banking")).await.unwrap();
//! ctx.principals
//!     .save(Principal::new("banking", "tom").with_claim(Claim::new("banking", "read", "Ledger")))
//!     .await
//!     .unwrap();
//!
//! let manager = SecurityManager::new(ctx);
//! let request = SecurityAccessRequest::new("banking", "tom", "read", "Ledger");
//! assert_eq!(manager.check(&request).await.unwrap(), Effect::Allow);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod condition;
pub mod context;
pub mod error;
pub mod fixture;
pub mod manager;
pub mod model;
pub mod quota;
pub mod repository;
pub mod types;

pub use condition::{ConditionEvaluator, EvaluationContext, ExpressionEvaluator, Transform};
pub use context::AuthzContext;
pub use error::{AuthzError, ConditionError, FixtureError, PersistenceError, Result};
pub use fixture::{Fixture, FixtureSummary};
pub use manager::{DecisionStrategy, SecurityManager, SecurityManagerConfig};
pub use model::{Claim, Keyed, Limit, Principal, Realm, Role, UniqueSet};
pub use quota::QuotaTransform;
pub use repository::{
    ClaimFilter, ClaimRepository, InMemoryStore, PrincipalFilter, PrincipalRepository,
    RealmRepository, RoleFilter, RoleRepository,
};
pub use types::{Context, Effect, SecurityAccessRequest};
