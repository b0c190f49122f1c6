use std::sync::Arc;

use rand::{Rng, SeedableRng, rngs::StdRng};

use chatpass_core::services::ledger::{BalanceLedger, LedgerError};
use chatpass_core::services::registry::CodeDefinition;
use chatpass_core::types::{Grant, Uses};
use chatpass_core::utils::clock::{Clock, ManualClock};
use chatpass_core::utils::revision::Revision;

const T0: i64 = 1_700_000_000_000;
const HOUR_MS: i64 = 3_600_000;

fn ledger() -> (BalanceLedger, ManualClock) {
    let clock = ManualClock::starting_at(T0);
    (BalanceLedger::new(Arc::new(clock.clone()), Revision::new()), clock)
}

fn code(code: &str, grant: Uses, cooldown_ms: Option<u64>) -> CodeDefinition {
    CodeDefinition {
        code: code.to_string(),
        grant,
        tier: "TEST".to_string(),
        cooldown_ms,
        description: String::new(),
    }
}

#[test]
fn unknown_identity_has_no_balance_and_cannot_consume() {
    let (ledger, _) = ledger();
    assert!(ledger.get_balance("ghost").is_none());
    assert_eq!(
        ledger.consume("ghost", 1),
        Err(LedgerError::InsufficientBalance { remaining: 0, requested: 1 })
    );
}

#[test]
fn consume_stops_at_zero() {
    let (ledger, _) = ledger();
    ledger.grant("u1", Grant::uses(Uses::Limited(2)));
    assert_eq!(ledger.consume("u1", 1).unwrap().remaining, Uses::Limited(1));
    assert_eq!(ledger.consume("u1", 1).unwrap().remaining, Uses::Limited(0));
    assert!(matches!(
        ledger.consume("u1", 1),
        Err(LedgerError::InsufficientBalance { remaining: 0, .. })
    ));
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(0));
}

#[test]
fn consume_more_than_remaining_leaves_balance_untouched() {
    let (ledger, _) = ledger();
    ledger.grant("u1", Grant::uses(Uses::Limited(3)));
    assert_eq!(
        ledger.consume("u1", 4),
        Err(LedgerError::InsufficientBalance { remaining: 3, requested: 4 })
    );
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(3));
}

#[test]
fn unlimited_is_never_decremented_and_absorbs_grants() {
    let (ledger, _) = ledger();
    ledger.grant("vip", code("UNLIMITED123", Uses::Unlimited, None).to_grant());
    for _ in 0..100 {
        assert_eq!(ledger.consume("vip", 1).unwrap().remaining, Uses::Unlimited);
    }
    let after = ledger.grant("vip", Grant::uses(Uses::Limited(25)));
    assert_eq!(after.remaining, Uses::Unlimited);
}

#[test]
fn grants_accumulate() {
    let (ledger, _) = ledger();
    ledger.grant("u1", Grant::uses(Uses::Limited(5)));
    let b = ledger.grant("u1", Grant::uses(Uses::Limited(10)));
    assert_eq!(b.remaining, Uses::Limited(15));
    assert!(b.source_code.is_none(), "plain top-ups carry no code");
}

#[test]
fn cooldown_reset_restores_nominal_uses() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("HOURLY5", Uses::Limited(5), Some(3_600_000)).to_grant());
    for _ in 0..5 {
        ledger.consume("u1", 1).unwrap();
    }
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(0));

    clock.advance_ms(HOUR_MS - 1);
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(0));

    clock.advance_ms(1);
    let b = ledger.get_balance("u1").unwrap();
    assert_eq!(b.remaining, Uses::Limited(5));
    assert_eq!(b.last_reset_ms, Some(T0 + HOUR_MS));
}

#[test]
fn cooldown_reset_applies_on_consume_too() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("HOURLY1", Uses::Limited(1), Some(3_600_000)).to_grant());
    ledger.consume("u1", 1).unwrap();
    assert!(ledger.consume("u1", 1).is_err());
    clock.advance_ms(2 * HOUR_MS);
    assert_eq!(ledger.consume("u1", 1).unwrap().remaining, Uses::Limited(0));
}

#[test]
fn cooldown_reset_keeps_uses_above_nominal() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("HOURLY5", Uses::Limited(5), Some(3_600_000)).to_grant());
    ledger.grant("u1", Grant::uses(Uses::Limited(10)));
    ledger.consume("u1", 1).unwrap();
    clock.advance_ms(HOUR_MS);
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(14));
}

#[test]
fn time_to_reset_counts_down() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("HALF", Uses::Limited(25), Some(1_800_000)).to_grant());
    clock.advance_ms(600_000);
    let b = ledger.get_balance("u1").unwrap();
    assert_eq!(b.time_to_reset_ms(clock.now_ms()), 1_200_000);

    ledger.grant("plain", Grant::uses(Uses::Limited(1)));
    assert_eq!(ledger.get_balance("plain").unwrap().time_to_reset_ms(T0), 0);
}

#[test]
fn random_sequences_never_go_negative() {
    let (ledger, _) = ledger();
    let mut rng = StdRng::seed_from_u64(7);
    let mut model: u64 = 0;
    for _ in 0..2_000 {
        if rng.gen_bool(0.3) {
            let amount = rng.gen_range(0..4);
            ledger.grant("u1", Grant::uses(Uses::Limited(amount)));
            model += amount;
        } else {
            let n = rng.gen_range(1..4);
            match ledger.consume("u1", n) {
                Ok(b) => {
                    assert!(model >= n, "consume succeeded past the model balance");
                    model -= n;
                    assert_eq!(b.remaining, Uses::Limited(model));
                }
                Err(LedgerError::InsufficientBalance { remaining, .. }) => {
                    assert!(model < n);
                    assert_eq!(remaining, model);
                }
            }
        }
    }
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(model));
}

#[test]
fn concurrent_consumers_never_overspend() {
    let (ledger, _) = ledger();
    let ledger = Arc::new(ledger);
    ledger.grant("shared", Grant::uses(Uses::Limited(100)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                let mut ok = 0u64;
                for _ in 0..50 {
                    if ledger.consume("shared", 1).is_ok() {
                        ok += 1;
                    }
                }
                ok
            })
        })
        .collect();
    let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 100);
    assert_eq!(ledger.get_balance("shared").unwrap().remaining, Uses::Limited(0));
}

#[test]
fn snapshot_and_restore_preserve_balances() {
    let (ledger, clock) = ledger();
    ledger.grant("a", Grant::uses(Uses::Limited(3)));
    ledger.grant("b", Grant::uses(Uses::Unlimited));
    let snap = ledger.snapshot();

    let other = BalanceLedger::new(Arc::new(clock), Revision::new());
    other.restore(snap.clone());
    assert_eq!(other.snapshot(), snap);
}

#[test]
fn code_without_cooldown_keeps_existing_refill() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("HOURLY10", Uses::Limited(10), Some(3_600_000)).to_grant());
    let b = ledger.grant("u1", code("FLAT5", Uses::Limited(5), None).to_grant());
    assert_eq!(b.source_code.as_deref(), Some("FLAT5"));
    assert_eq!(b.cooldown_ms(), Some(3_600_000));
    assert_eq!(b.last_reset_ms, Some(T0));

    for _ in 0..15 {
        ledger.consume("u1", 1).unwrap();
    }
    clock.advance_ms(HOUR_MS);
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(10));
}

#[test]
fn code_with_cooldown_replaces_refill() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("HOURLY10", Uses::Limited(10), Some(3_600_000)).to_grant());
    clock.advance_ms(600_000);
    let b = ledger.grant("u1", code("HALF25", Uses::Limited(25), Some(1_800_000)).to_grant());
    assert_eq!(b.cooldown_ms(), Some(1_800_000));
    assert_eq!(b.last_reset_ms, Some(T0 + 600_000));
}

#[test]
fn oversized_cooldown_never_elapses() {
    let (ledger, clock) = ledger();
    ledger.grant("u1", code("FOREVER", Uses::Limited(1), Some(u64::MAX)).to_grant());
    ledger.consume("u1", 1).unwrap();
    clock.advance_ms(100 * 365 * 24 * HOUR_MS);
    assert_eq!(ledger.get_balance("u1").unwrap().remaining, Uses::Limited(0));
    assert!(ledger.consume("u1", 1).is_err());
}

#[test]
fn purge_forgets_the_balance() {
    let (ledger, _) = ledger();
    ledger.grant("u1", Grant::uses(Uses::Limited(1)));
    assert_eq!(ledger.last_activity_ms("u1"), Some(T0));
    assert!(ledger.purge("u1"));
    assert!(!ledger.purge("u1"));
    assert!(ledger.last_activity_ms("u1").is_none());
}
