use authz::{
    AuthzContext, Claim, Effect, Keyed, Limit, PersistenceError, Principal, Realm, Role,
    SecurityAccessRequest, SecurityManager,
};
use chrono::{Duration, NaiveDate, Utc};

const REALM: &str = "banking";

/// Helper to build a manager over an in-memory store holding `roles` (in
/// dependency order) and `principals`.
async fn setup(roles: Vec<Role>, principals: Vec<Principal>) -> SecurityManager {
    let ctx = AuthzContext::in_memory();
    ctx.realms.save(Realm::new(REALM)).await.unwrap();
    for role in roles {
        ctx.roles.save(role).await.unwrap();
    }
    for principal in principals {
        ctx.principals.save(principal).await.unwrap();
    }
    SecurityManager::new(ctx)
}

fn request(principal: &str, action: &str, resource: &str) -> SecurityAccessRequest {
    SecurityAccessRequest::new(REALM, principal, action, resource)
}

fn next_month() -> NaiveDate {
    (Utc::now() + Duration::days(30)).date_naive()
}

fn teller() -> Role {
    Role::new(REALM, "Teller").with_claim(
        Claim::new(REALM, "(read|modify)", "DepositAccount")
            .with_condition("employeeRegion == \"MIDWEST\""),
    )
}

#[tokio::test]
async fn test_default_deny_without_matching_claim() {
    let tom = Principal::new(REALM, "tom").with_claim(Claim::new(REALM, "read", "Directory"));
    let manager = setup(vec![], vec![tom]).await;

    let effect = manager
        .check(&request("tom", "read", "DepositAccount"))
        .await
        .unwrap();
    assert_eq!(effect, Effect::DefaultDeny);
}

#[tokio::test]
async fn test_direct_claim_allows() {
    let tom = Principal::new(REALM, "tom").with_claim(Claim::new(REALM, "read", "DepositAccount"));
    let manager = setup(vec![], vec![tom]).await;

    let effect = manager
        .check(&request("tom", "read", "DepositAccount"))
        .await
        .unwrap();
    assert_eq!(effect, Effect::Allow);
}

#[tokio::test]
async fn test_role_inheritance_counts_each_claim_once() {
    let c1 = Claim::new(REALM, "read", "C1");
    let c2 = Claim::new(REALM, "read", "C2");
    let r1 = Role::new(REALM, "R1").with_claim(c1.clone());
    let r2 = Role::new(REALM, "R2")
        .with_claim(c2.clone())
        .with_parent(Role::new(REALM, "R1"));
    let r3 = Role::new(REALM, "R3")
        .with_claim(c1.clone())
        .with_parent(Role::new(REALM, "R1"));
    let tom = Principal::new(REALM, "tom")
        .with_role(Role::new(REALM, "R2"))
        .with_role(Role::new(REALM, "R3"));

    let manager = setup(vec![r1, r2, r3], vec![tom]).await;
    let tom = manager
        .context()
        .principals
        .find_by_name(REALM, "tom")
        .await
        .unwrap()
        .unwrap();

    let keys: Vec<String> = tom.all_claims().iter().map(|c| c.unique_key()).collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys.iter().filter(|k| **k == c1.unique_key()).count(), 1);
    assert_eq!(keys.iter().filter(|k| **k == c2.unique_key()).count(), 1);
}

#[tokio::test]
async fn test_duplicate_claims_collapse() {
    let mut role = Role::new(REALM, "Teller");
    assert!(role.add_claim(Claim::new(REALM, "read", "DepositAccount")));
    assert!(!role.add_claim(Claim::new(REALM, "read", "DepositAccount")));
    assert_eq!(role.claims.len(), 1);

    let mut tom = Principal::new(REALM, "tom");
    assert!(tom.add_claim(Claim::new(REALM, "read", "DepositAccount")));
    assert!(!tom.add_claim(Claim::new(REALM, "read", "DepositAccount")));
    assert_eq!(tom.claims.len(), 1);
}

#[tokio::test]
async fn test_conditional_grant_by_region() {
    let tom = Principal::new(REALM, "tom").with_claim(
        Claim::new(REALM, "read", "DepositAccount").with_condition("region == 'MIDWEST'"),
    );
    let manager = setup(vec![], vec![tom]).await;

    let midwest = request("tom", "read", "DepositAccount").with_attribute("region", "MIDWEST");
    let east = request("tom", "read", "DepositAccount").with_attribute("region", "EAST");

    assert_eq!(manager.check(&midwest).await.unwrap(), Effect::Allow);
    assert_eq!(manager.check(&east).await.unwrap(), Effect::DefaultDeny);
}

#[tokio::test]
async fn test_regex_action() {
    let claim = Claim::new(REALM, "(create|delete)", "LoanAccount");
    assert!(claim.implies("create", "LoanAccount"));
    assert!(claim.implies("delete", "LoanAccount"));
    assert!(!claim.implies("update", "LoanAccount"));

    let tom = Principal::new(REALM, "tom").with_claim(claim);
    let manager = setup(vec![], vec![tom]).await;
    assert_eq!(
        manager
            .check(&request("tom", "delete", "LoanAccount"))
            .await
            .unwrap(),
        Effect::Allow
    );
    assert_eq!(
        manager
            .check(&request("tom", "update", "LoanAccount"))
            .await
            .unwrap(),
        Effect::DefaultDeny
    );
}

#[tokio::test]
async fn test_quota_increments_until_exhausted() {
    let tom =
        Principal::new(REALM, "tom").with_limit(Limit::new("quota", "Report", 2, next_month()));
    let manager = setup(vec![], vec![tom.clone()]).await;
    let principals = &manager.context().principals;

    assert_eq!(principals.increment(&tom, "quota", "Report").await.unwrap().value, 1);
    assert_eq!(principals.increment(&tom, "quota", "Report").await.unwrap().value, 2);
    let err = principals.increment(&tom, "quota", "Report").await.unwrap_err();
    assert!(matches!(err, PersistenceError::LimitExhausted { .. }));
}

#[test]
fn test_limit_validity() {
    let full = Limit::new("quota", "Report", 2, next_month()).with_value(2);
    assert!(full.is_valid());

    let expired = Limit::new("quota", "Report", 2, NaiveDate::from_ymd_opt(2001, 1, 1).unwrap())
        .with_value(2);
    assert!(!expired.is_valid());
}

#[tokio::test]
async fn test_teller_cannot_create() {
    let tom = Principal::new(REALM, "tom")
        .with_role(Role::new(REALM, "Teller"))
        .with_property("employeeRegion", "MIDWEST");
    let manager = setup(vec![teller()], vec![tom]).await;

    assert_eq!(
        manager
            .check(&request("tom", "modify", "DepositAccount"))
            .await
            .unwrap(),
        Effect::Allow
    );
    assert_eq!(
        manager
            .check(&request("tom", "create", "DepositAccount"))
            .await
            .unwrap(),
        Effect::DefaultDeny
    );
}

#[tokio::test]
async fn test_scenario_teller_region() {
    let tom = Principal::new(REALM, "tom").with_role(Role::new(REALM, "Teller"));
    let manager = setup(vec![teller()], vec![tom]).await;

    let east = request("tom", "read", "DepositAccount").with_attribute("employeeRegion", "EAST");
    assert_eq!(manager.check(&east).await.unwrap(), Effect::DefaultDeny);

    let midwest =
        request("tom", "read", "DepositAccount").with_attribute("employeeRegion", "MIDWEST");
    assert_eq!(manager.check(&midwest).await.unwrap(), Effect::Allow);
}

#[tokio::test]
async fn test_scenario_branch_manager_override() {
    let accounting = Role::new(REALM, "AccountingManager")
        .with_claim(Claim::new(REALM, "read", "LoanAccount"));
    let loan_officer = Role::new(REALM, "LoanOfficer").with_claim(
        Claim::new(REALM, "(create|delete)", "LoanAccount")
            .with_condition("accountBalance < 10000"),
    );
    let branch_manager = Role::new(REALM, "BranchManager")
        .with_parent(Role::new(REALM, "AccountingManager"))
        .with_parent(Role::new(REALM, "LoanOfficer"));

    let barry = Principal::new(REALM, "barry")
        .with_role(Role::new(REALM, "BranchManager"))
        .with_claim(Claim::new(REALM, "create", "LoanAccount"))
        .with_claim(Claim::new(REALM, "delete", "LoanAccount"));
    let cathy = Principal::new(REALM, "cathy").with_role(Role::new(REALM, "BranchManager"));

    let manager = setup(
        vec![accounting, loan_officer, branch_manager],
        vec![barry, cathy],
    )
    .await;

    let big_delete = |who: &str| {
        request(who, "delete", "LoanAccount").with_attribute("accountBalance", 10001)
    };

    assert_eq!(manager.check(&big_delete("barry")).await.unwrap(), Effect::Allow);
    // Without the direct override the parent's threshold applies.
    assert_eq!(
        manager.check(&big_delete("cathy")).await.unwrap(),
        Effect::DefaultDeny
    );
}

#[tokio::test]
async fn test_scenario_quota_in_context() {
    let tom = Principal::new(REALM, "tom")
        .with_limit(Limit::new("quota", "Report", 2, next_month()))
        .with_claim(
            Claim::new(REALM, "generate", "Report")
                .with_condition("Report_value < Report_maxAllowed"),
        );
    let manager = setup(vec![], vec![tom.clone()]).await;
    let generate = request("tom", "generate", "Report");

    assert_eq!(manager.check(&generate).await.unwrap(), Effect::Allow);
    assert_eq!(manager.check(&generate).await.unwrap(), Effect::Allow);

    let principals = &manager.context().principals;
    principals.increment(&tom, "quota", "Report").await.unwrap();
    principals.increment(&tom, "quota", "Report").await.unwrap();

    assert_eq!(manager.check(&generate).await.unwrap(), Effect::DefaultDeny);
}

#[tokio::test]
async fn test_scenario_quota_consumed_by_incr() {
    let tom = Principal::new(REALM, "tom")
        .with_limit(Limit::new("quota", "Report", 2, next_month()))
        .with_claim(Claim::new(REALM, "generate", "Report").with_condition("'Report'|incr"));
    let manager = setup(vec![], vec![tom]).await;
    let generate = request("tom", "generate", "Report");

    assert_eq!(manager.check(&generate).await.unwrap(), Effect::Allow);
    assert_eq!(manager.check(&generate).await.unwrap(), Effect::Allow);
    assert_eq!(manager.check(&generate).await.unwrap(), Effect::DefaultDeny);

    let tom = manager
        .context()
        .principals
        .find_by_name(REALM, "tom")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tom.find_limit(Some("quota"), "Report").unwrap().value, 2);
}

#[tokio::test]
async fn test_explicit_deny_after_allow() {
    let tom = Principal::new(REALM, "tom")
        .with_claim(Claim::new(REALM, "*", "Vault"))
        .with_claim(
            Claim::new(REALM, "open", "Vault")
                .with_condition("hour >= 18")
                .with_effect(Effect::Deny),
        );
    let manager = setup(vec![], vec![tom]).await;

    let day = request("tom", "open", "Vault").with_attribute("hour", 10);
    let night = request("tom", "open", "Vault").with_attribute("hour", 22);

    assert_eq!(manager.check(&day).await.unwrap(), Effect::Allow);
    assert_eq!(manager.check(&night).await.unwrap(), Effect::Deny);
}

#[tokio::test]
async fn test_deeply_nested_condition_is_rejected_without_crashing() {
    let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));

    let tom = Principal::new(REALM, "tom")
        .with_claim(Claim::new(REALM, "read", "Ledger").with_condition(deep.clone()));
    let ann = Principal::new(REALM, "ann")
        .with_claim(Claim::new(REALM, "read", "Ledger"))
        .with_claim(
            Claim::new(REALM, "read", "Ledger")
                .with_condition(deep)
                .with_effect(Effect::Deny),
        );
    let manager = setup(vec![], vec![tom, ann]).await;

    assert_eq!(
        manager.check(&request("tom", "read", "Ledger")).await.unwrap(),
        Effect::DefaultDeny
    );
    // The unparseable deny is skipped and the allow still applies.
    assert_eq!(
        manager.check(&request("ann", "read", "Ledger")).await.unwrap(),
        Effect::Allow
    );
}
