use std::cmp::Reverse;

use tracing::info;
use ulid::Ulid;

use super::{EngineError, Txn};
use crate::model::*;

/// Pick the queued reservation to promote: highest credit score, then the
/// earliest `created_at`, then the lowest creation sequence.
pub fn select_next<'a>(candidates: impl IntoIterator<Item = (&'a Reservation, i32)>) -> Option<&'a Reservation> {
    candidates
        .into_iter()
        .filter(|(r, _)| r.status == ReservationStatus::Queued)
        .max_by_key(|(r, credit)| (*credit, Reverse(r.created_at), Reverse(r.seq)))
        .map(|(r, _)| r)
}

impl Txn<'_> {
    /// Hand a free unit of `slot_id` to the best queued reservation, if there
    /// is both a free unit and a waiter.
    pub fn promote_next(&mut self, slot_id: Ulid) -> Result<Option<Ulid>, EngineError> {
        if self.slot(slot_id)?.is_full() {
            return Ok(None);
        }
        let next = {
            let tables = self.tables();
            let candidates = tables
                .on_slot_with(&slot_id, ReservationStatus::Queued)
                .into_iter()
                .filter_map(|r| tables.user(&r.user_account).map(|u| (r, u.credit_score)));
            select_next(candidates).map(|r| (r.id, r.user_account.clone()))
        };
        let Some((id, account)) = next else {
            return Ok(None);
        };
        if !self.try_occupy(slot_id)? {
            return Ok(None);
        }
        self.transition(id, ReservationStatus::Confirmed)?;
        metrics::counter!(crate::observability::WAITLIST_PROMOTIONS_TOTAL).increment(1);
        info!(reservation = %id, %account, slot = %slot_id, "promoted from waitlist");
        Ok(Some(id))
    }

    /// Promote until the slot is full or nobody is waiting.
    pub fn promote_all(&mut self, slot_id: Ulid) -> Result<usize, EngineError> {
        let mut promoted = 0;
        while self.promote_next(slot_id)?.is_some() {
            promoted += 1;
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 8).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn queued(account: &str, seq: u64, created_at: NaiveDateTime) -> Reservation {
        Reservation {
            id: Ulid::new(),
            seq,
            user_account: account.into(),
            slot_id: Ulid::nil(),
            status: ReservationStatus::Queued,
            created_at,
            cancelled_at: None,
        }
    }

    #[test]
    fn highest_credit_wins() {
        let a = queued("a", 0, t0());
        let b = queued("b", 1, t0() + Duration::minutes(1));
        let picked = select_next([(&a, 85), (&b, 95)]).unwrap();
        assert_eq!(picked.user_account, "b");
    }

    #[test]
    fn ties_go_to_earliest_then_lowest_seq() {
        let a = queued("a", 5, t0() + Duration::minutes(1));
        let b = queued("b", 7, t0());
        let c = queued("c", 6, t0());
        let picked = select_next([(&a, 90), (&b, 90), (&c, 90)]).unwrap();
        assert_eq!(picked.user_account, "c");
    }

    #[test]
    fn ignores_non_queued_and_empty() {
        let mut confirmed = queued("a", 0, t0());
        confirmed.status = ReservationStatus::Confirmed;
        assert!(select_next([(&confirmed, 100)]).is_none());
        assert!(select_next(std::iter::empty()).is_none());
    }
}
