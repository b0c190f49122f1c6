use std::sync::{Arc, Barrier};

use chatpass_core::services::registry::{CodeDefinition, CodeRegistry, RegistryError};
use chatpass_core::types::{ResetPolicy, Uses};
use chatpass_core::utils::revision::Revision;

fn registry() -> CodeRegistry {
    CodeRegistry::new(
        vec![
            CodeDefinition {
                code: "TEST5".to_string(),
                grant: Uses::Limited(5),
                tier: "TEST".to_string(),
                cooldown_ms: None,
                description: "5 uses".to_string(),
            },
            CodeDefinition {
                code: "PREMIUM50".to_string(),
                grant: Uses::Limited(50),
                tier: "PREMIUM".to_string(),
                cooldown_ms: Some(3_600_000),
                description: "50 uses, resets every hour".to_string(),
            },
            CodeDefinition {
                code: "UNLIMITED123".to_string(),
                grant: Uses::Unlimited,
                tier: "UNLIMITED".to_string(),
                cooldown_ms: Some(60_000),
                description: String::new(),
            },
        ],
        Revision::new(),
    )
}

#[test]
fn lookup_known_and_unknown_codes() {
    let reg = registry();
    assert_eq!(reg.lookup("TEST5").unwrap().grant, Uses::Limited(5));
    assert_eq!(
        reg.lookup("test5"),
        Err(RegistryError::NotFound("test5".to_string()))
    );
}

#[test]
fn second_redeem_by_same_identity_fails() {
    let reg = registry();
    let def = reg.redeem("u1", "TEST5").unwrap();
    assert_eq!(def.code, "TEST5");
    assert!(reg.has_redeemed("u1", "TEST5"));
    assert_eq!(
        reg.redeem("u1", "TEST5"),
        Err(RegistryError::AlreadyRedeemed("TEST5".to_string()))
    );
}

#[test]
fn other_identities_redeem_independently() {
    let reg = registry();
    reg.redeem("u1", "TEST5").unwrap();
    reg.redeem("u2", "TEST5").unwrap();
    reg.redeem("u1", "PREMIUM50").unwrap();
    let snap = reg.snapshot();
    assert_eq!(snap["u1"].len(), 2);
    assert_eq!(snap["u2"].len(), 1);
}

#[test]
fn unknown_code_is_not_recorded() {
    let reg = registry();
    assert!(matches!(reg.redeem("u1", "NOPE"), Err(RegistryError::NotFound(_))));
    assert!(!reg.has_redeemed("u1", "NOPE"));
}

#[test]
fn concurrent_identical_redeems_succeed_once() {
    let reg = Arc::new(registry());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reg = reg.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                reg.redeem("racer", "TEST5").is_ok()
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn grants_carry_refill_only_for_finite_cooldown_codes() {
    let reg = registry();
    let premium = reg.lookup("PREMIUM50").unwrap().to_grant();
    assert_eq!(premium.amount, Uses::Limited(50));
    assert_eq!(premium.source_code.as_deref(), Some("PREMIUM50"));
    assert_eq!(
        premium.reset,
        Some(ResetPolicy { nominal: 50, cooldown_ms: 3_600_000 })
    );

    let unlimited = reg.lookup("UNLIMITED123").unwrap().to_grant();
    assert_eq!(unlimited.reset, None);

    assert_eq!(reg.lookup("TEST5").unwrap().to_grant().reset, None);
}

#[test]
fn definitions_are_sorted_and_purge_forgets_redemptions() {
    let reg = registry();
    let codes: Vec<String> = reg.definitions().into_iter().map(|d| d.code).collect();
    assert_eq!(codes, vec!["PREMIUM50", "TEST5", "UNLIMITED123"]);

    reg.redeem("u1", "TEST5").unwrap();
    assert!(reg.purge("u1"));
    assert!(!reg.has_redeemed("u1", "TEST5"));
    assert!(reg.redeem("u1", "TEST5").is_ok());
}
