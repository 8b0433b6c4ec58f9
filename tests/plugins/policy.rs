use std::cell::Cell;
use std::sync::Arc;
use stewardgate::core::audit::MemoryAuditLog;
use stewardgate::core::config::GateConfig;
use stewardgate::core::error::{DecisionError, GateError};
use stewardgate::core::model::{BlastRadius, DecisionBasis, ProposalRequest};
use stewardgate::gate::Gate;
use stewardgate::plugins::coordinator::{Explanation, Verdict};
use stewardgate::plugins::policy::{Pattern, PolicyChain};
use tempfile::tempdir;

fn chain(config: &GateConfig) -> PolicyChain {
    PolicyChain::from_config(config).unwrap()
}

fn home() -> GateConfig {
    GateConfig::default()
        .allow("turn_on", "light.*")
        .allow("set_temperature", "thermostat.hall")
        .safe_domain("lights")
        .safe_domain("climate")
}

#[test]
fn test_chain_order_is_fixed() {
    assert_eq!(
        chain(&home()).names(),
        vec!["allowlist", "safe_domain", "reversible"]
    );

    let mut capped = home();
    capped.max_blast_radius = Some(BlastRadius::Room);
    assert_eq!(
        chain(&capped).names(),
        vec!["allowlist", "safe_domain", "reversible", "blast_radius"]
    );
}

#[test]
fn test_every_policy_runs_even_after_a_failure() {
    let p = ProposalRequest::new("agent", "unlock", "door.front", "security", "")
        .build()
        .unwrap();
    let report = chain(&home()).evaluate(&p);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.failures().count(), 3);
    assert!(!report.all_passed());
    assert_eq!(
        report.get("safe_domain").unwrap().detail,
        "domain 'security' requires confirmation"
    );
    assert_eq!(
        report.get("reversible").unwrap().detail,
        "missing rollback plan"
    );
}

#[test]
fn test_evaluation_is_idempotent() {
    let p = ProposalRequest::new("agent", "turn_on", "light.porch", "lights", "dusk")
        .rollback_plan("turn_off light.porch")
        .build()
        .unwrap();
    let c = chain(&home());
    let first = c.evaluate(&p);
    for _ in 0..5 {
        assert_eq!(c.evaluate(&p), first);
    }
    assert!(first.all_passed());
}

#[test]
fn test_wildcard_is_anchored() {
    let c = chain(&home());
    let eval = |resource: &str| {
        let p = ProposalRequest::new("agent", "turn_on", resource, "lights", "")
            .rollback_plan("turn_off")
            .build()
            .unwrap();
        c.evaluate(&p).get("allowlist").unwrap().passed
    };
    assert!(eval("light.kitchen"));
    assert!(eval("light."));
    assert!(!eval("nightlight.kitchen"));
    assert!(!eval("switch.light.kitchen"));
}

#[test]
fn test_blank_rollback_plan_is_irreversible() {
    let p = ProposalRequest::new("agent", "turn_on", "light.porch", "lights", "")
        .rollback_plan("   ")
        .build()
        .unwrap();
    assert!(!p.is_reversible());
    assert!(!chain(&home()).evaluate(&p).all_passed());
}

#[test]
fn test_missing_rollback_is_never_auto_approved() {
    let gate = Gate::new(home(), Arc::new(MemoryAuditLog::new())).unwrap();
    for (action, resource, domain) in [
        ("turn_on", "light.kitchen", "lights"),
        ("set_temperature", "thermostat.hall", "climate"),
    ] {
        let p = gate
            .propose(ProposalRequest::new("agent", action, resource, domain, "routine"))
            .unwrap();
        let d = gate
            .decide(&p, "steward", &|_: &Explanation| -> Result<Option<Verdict>, DecisionError> {
                Ok(None)
            })
            .unwrap();
        assert!(!d.approved());
        assert_ne!(d.basis(), DecisionBasis::Auto);
    }
}

#[test]
fn test_not_allowlisted_invokes_decider_exactly_once() {
    let gate = Gate::new(home(), Arc::new(MemoryAuditLog::new())).unwrap();
    let p = gate
        .propose(
            ProposalRequest::new("agent", "turn_off", "light.kitchen", "lights", "bedtime")
                .rollback_plan("turn_on light.kitchen"),
        )
        .unwrap();

    let asked = Cell::new(0);
    let decider = |e: &Explanation| -> Result<Option<Verdict>, DecisionError> {
        asked.set(asked.get() + 1);
        let failed: Vec<&str> = e.policies.failures().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["allowlist"]);
        Ok(Some(Verdict::approve("fine")))
    };
    let d = gate.decide(&p, "steward", &decider).unwrap();
    assert_eq!(asked.get(), 1);
    assert!(d.approved());
}

#[test]
fn test_blast_radius_cap() {
    let mut config = home();
    config.max_blast_radius = Some(BlastRadius::Room);
    let c = chain(&config);

    let with = |radius: Option<BlastRadius>| {
        let mut req = ProposalRequest::new("agent", "turn_on", "light.kitchen", "lights", "")
            .rollback_plan("turn_off light.kitchen");
        if let Some(r) = radius {
            req = req.blast_radius(r);
        }
        c.evaluate(&req.build().unwrap())
    };

    assert!(with(Some(BlastRadius::SingleDevice)).all_passed());
    assert!(with(Some(BlastRadius::Room)).all_passed());
    assert!(!with(Some(BlastRadius::WholeHome)).all_passed());
    let undeclared = with(None);
    assert!(!undeclared.get("blast_radius").unwrap().passed);
}

#[test]
fn test_match_everything_patterns_are_refused() {
    assert!(Pattern::parse("*").is_err());
    assert!(Pattern::parse("a*b*").is_err());
    assert!(Pattern::parse("").is_err());
    assert_eq!(
        Pattern::parse("*.kitchen").unwrap(),
        Pattern::Wildcard {
            prefix: String::new(),
            suffix: ".kitchen".to_string()
        }
    );

    let config = GateConfig::default().allow("*", "light.kitchen");
    assert!(matches!(
        Gate::new(config, Arc::new(MemoryAuditLog::new())),
        Err(GateError::Config(_))
    ));
}

#[test]
fn test_config_file_drives_the_chain() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("stewardgate.toml");
    std::fs::write(
        &path,
        r#"
safe_domains = ["lights"]

[[allowlist]]
action = "turn_*"
resource = "light.kitchen"

[rate_limit]
window_secs = 30
max_requests = 2
"#,
    )
    .unwrap();

    let config = GateConfig::load(&path).unwrap();
    assert_eq!(config.rate_limit.max_requests, 2);
    let c = chain(&config);
    let p = ProposalRequest::new("agent", "turn_off", "light.kitchen", "lights", "")
        .rollback_plan("turn_on light.kitchen")
        .build()
        .unwrap();
    assert!(c.evaluate(&p).all_passed());
}
