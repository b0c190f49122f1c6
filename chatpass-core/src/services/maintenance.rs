// src/services/maintenance.rs
//! Periodic housekeeping, independent of request handling:
//! stale chat history, daily unlock counters, idle identities, idle locks,
//! and a snapshot flush at the end of every pass.

use crossbeam_channel::{Sender, bounded, RecvTimeoutError};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::MaintenanceConfig;
use crate::services::Services;

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub history_purged: usize,
    pub daily_counters_reset: usize,
    pub identities_purged: usize,
    pub locks_pruned: usize,
    pub saved: bool,
}

pub struct Maintenance {
    services: Arc<Services>,
    cfg: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(services: Arc<Services>, cfg: MaintenanceConfig) -> Self {
        Self { services, cfg }
    }

    pub fn run_once(&self) -> MaintenanceReport {
        let s = &self.services;
        let now = s.clock.now_ms();
        let mut report = MaintenanceReport::default();

        let history_cutoff = now - (self.cfg.history_retention_hours as i64) * HOUR_MS;
        report.history_purged = s.history.purge_older_than(history_cutoff);

        report.daily_counters_reset = s.rewards.reset_daily_counters(s.clock.today());

        if let Some(days) = self.cfg.identity_retention_days {
            let cutoff = now - (days as i64) * DAY_MS;
            let known: BTreeSet<String> = s
                .ledger
                .identities()
                .into_iter()
                .chain(s.rewards.identities())
                .chain(s.registry.identities())
                .collect();
            for identity in known {
                if s.gate.purge_if_idle(&identity, cutoff) {
                    report.identities_purged += 1;
                }
            }
        }

        report.locks_pruned = s.gate.prune_idle_locks();

        report.saved = match s.vault.flush() {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(error = %e, "maintenance flush failed");
                false
            }
        };

        if report.history_purged + report.daily_counters_reset + report.identities_purged > 0 {
            tracing::info!(?report, "maintenance pass");
            s.logbook.record("maintenance", "system", json!(report));
        }
        report
    }

    /// Run `run_once` every `interval` on a background thread until the handle is shut down.
    pub fn spawn(self, interval: Duration) -> MaintenanceHandle {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let join = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.run_once();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            if let Err(e) = self.services.vault.flush() {
                tracing::warn!(error = %e, "final flush failed");
            }
        });
        MaintenanceHandle {
            stop: Some(stop_tx),
            join: Some(join),
        }
    }
}

pub struct MaintenanceHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the loop and wait for the final flush.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
