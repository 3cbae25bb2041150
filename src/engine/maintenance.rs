use std::time::Instant;

use chrono::{Days, Duration};
use tracing::{error, info, warn};
use ulid::Ulid;

use super::{Engine, EngineError, Txn};
use crate::model::*;
use crate::observability::{
    CREDITS_RESTORED_TOTAL, MAINTENANCE_DURATION_SECONDS, MAINTENANCE_RUNS_TOTAL, MAINTENANCE_SKIPPED_TOTAL,
    NO_SHOWS_TOTAL,
};
use crate::time::{has_ended, hour, HourBlock};

impl Txn<'_> {
    fn mark_no_show(&mut self, id: Ulid) -> Result<(), EngineError> {
        let penalty = self.config().no_show_penalty;
        let before = self.transition(id, ReservationStatus::NoShow)?;
        self.release(before.slot_id)?;
        let user = self.user(&before.user_account)?;
        self.apply(Event::CreditScoreSet {
            account: user.account.clone(),
            score: user.credit_score - penalty,
        });
        self.apply(Event::CreditLogged {
            log: CreditLog {
                user_account: user.account,
                delta: -penalty,
                reason: CreditReason::NoShow,
                at: self.now(),
            },
        });
        Ok(())
    }

    /// Confirmed reservations on ended slots become no-shows; queued ones
    /// that never got a unit are cancelled.
    fn sweep_ended(&mut self, summary: &mut MaintenanceSummary) {
        let now = self.now();
        let due: Vec<(Ulid, ReservationStatus)> = {
            let tables = self.tables();
            tables
                .reservations()
                .filter(|r| r.status.is_active())
                .filter(|r| {
                    tables
                        .slot(&r.slot_id)
                        .is_some_and(|s| has_ended(s.date, s.end_time, now))
                })
                .map(|r| (r.id, r.status))
                .collect()
        };

        for (id, status) in due {
            let result = self.scoped(|txn| match status {
                ReservationStatus::Confirmed => txn.mark_no_show(id),
                _ => txn.transition(id, ReservationStatus::Cancelled).map(|_| ()),
            });
            match (result, status) {
                (Ok(()), ReservationStatus::Confirmed) => summary.no_shows += 1,
                (Ok(()), _) => summary.stale_queued += 1,
                (Err(e), _) => {
                    warn!(reservation = %id, error = %e, "no-show sweep skipped record");
                    summary.skipped += 1;
                }
            }
        }
    }

    /// Lift suspensions whose last deduction is older than the restore delay.
    fn restore_credit(&mut self, summary: &mut MaintenanceSummary) {
        let cfg = self.config();
        let now = self.now();
        let suspended: Vec<(String, i32)> = self
            .tables()
            .users()
            .filter(|u| u.credit_score <= cfg.suspend_at_or_below)
            .map(|u| (u.account.clone(), u.credit_score))
            .collect();

        for (account, score) in suspended {
            let Some(last) = self.tables().last_deduction(&account) else {
                warn!(%account, score, "suspended without a recorded deduction, leaving for manual review");
                summary.restore_pending_manual += 1;
                continue;
            };
            if now - last <= Duration::days(cfg.restore_after_days) {
                continue;
            }
            let result = self.scoped(|txn| {
                txn.user(&account)?;
                txn.apply(Event::CreditScoreSet {
                    account: account.clone(),
                    score: cfg.restored_credit,
                });
                txn.apply(Event::CreditLogged {
                    log: CreditLog {
                        user_account: account.clone(),
                        delta: cfg.restored_credit - score,
                        reason: CreditReason::SuspensionLifted,
                        at: now,
                    },
                });
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!(%account, from = score, to = cfg.restored_credit, "credit restored");
                    summary.credits_restored += 1;
                }
                Err(e) => {
                    warn!(%account, error = %e, "credit restoration skipped record");
                    summary.skipped += 1;
                }
            }
        }
    }

    /// Drop ended slots nobody reserved, then fill the booking window.
    fn roll_window(&mut self, summary: &mut MaintenanceSummary) {
        let cfg = self.config();
        let now = self.now();
        let today = self.today();

        let expired: Vec<Ulid> = {
            let tables = self.tables();
            tables
                .slots()
                .filter(|s| has_ended(s.date, s.end_time, now) && !tables.has_reservations(&s.id))
                .map(|s| s.id)
                .collect()
        };
        for id in expired {
            match self.scoped(|txn| txn.delete_slot(id)) {
                Ok(()) => summary.slots_deleted += 1,
                Err(e) => {
                    warn!(slot = %id, error = %e, "slot cleanup skipped record");
                    summary.skipped += 1;
                }
            }
        }

        let courts: Vec<(Ulid, u32)> = {
            let tables = self.tables();
            tables
                .courts()
                .filter_map(|c| {
                    tables
                        .venue(&c.venue_id)
                        .map(|v| (c.id, cfg.capacity_for(v.kind)))
                })
                .collect()
        };
        let blocks: Vec<HourBlock> = cfg
            .operating_hours()
            .filter_map(|h| Some(HourBlock { start: hour(h)?, end: hour(h + 1)? }))
            .collect();

        for offset in 0..cfg.window_days {
            let Some(date) = today.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };
            for block in &blocks {
                if has_ended(date, block.end, now) {
                    continue;
                }
                for &(court_id, capacity) in &courts {
                    if self.tables().slot_at(court_id, date, block.start).is_some() {
                        continue;
                    }
                    match self.scoped(|txn| txn.create_slot(court_id, date, *block, capacity, 0)) {
                        Ok(_) => summary.slots_created += 1,
                        Err(e) => {
                            warn!(court = %court_id, %date, error = %e, "slot generation skipped record");
                            summary.skipped += 1;
                        }
                    }
                }
            }
        }
    }
}

impl Engine {
    /// One maintenance pass: no-shows, credit restoration, rolling window.
    /// Refuses to start while another run holds the gate.
    pub async fn run_maintenance(&self) -> Result<MaintenanceSummary, EngineError> {
        let Ok(_gate) = self.maintenance_gate.try_lock() else {
            metrics::counter!(MAINTENANCE_RUNS_TOTAL, "status" => "busy").increment(1);
            warn!("maintenance already running, skipping");
            return Err(EngineError::MaintenanceInProgress);
        };

        let started = Instant::now();
        let result = self
            .transact("maintenance", |txn| {
                let mut summary = MaintenanceSummary::default();
                txn.sweep_ended(&mut summary);
                txn.restore_credit(&mut summary);
                txn.roll_window(&mut summary);
                Ok(summary)
            })
            .await;
        metrics::histogram!(MAINTENANCE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(summary) => {
                metrics::counter!(MAINTENANCE_RUNS_TOTAL, "status" => "ok").increment(1);
                metrics::counter!(NO_SHOWS_TOTAL).increment(summary.no_shows as u64);
                metrics::counter!(CREDITS_RESTORED_TOTAL).increment(summary.credits_restored as u64);
                metrics::counter!(MAINTENANCE_SKIPPED_TOTAL).increment(summary.skipped as u64);
                info!(%summary, "maintenance finished");
            }
            Err(e) => {
                metrics::counter!(MAINTENANCE_RUNS_TOTAL, "status" => "error").increment(1);
                error!(error = %e, "maintenance failed");
            }
        }
        result
    }
}
