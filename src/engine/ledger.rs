use std::cmp::Reverse;

use ulid::Ulid;

use super::{EngineError, Tables, Txn};
use crate::model::*;

impl Tables {
    /// The user's queued or confirmed reservation on a slot, if any.
    pub fn active_for(&self, account: &str, slot_id: &Ulid) -> Option<&Reservation> {
        self.reservations_on(slot_id)
            .find(|r| r.user_account == account && r.status.is_active())
    }

    /// Reservations on a slot in a given status, in creation order.
    pub fn on_slot_with(&self, slot_id: &Ulid, status: ReservationStatus) -> Vec<&Reservation> {
        let mut found: Vec<&Reservation> = self.reservations_on(slot_id).filter(|r| r.status == status).collect();
        found.sort_by_key(|r| r.seq);
        found
    }

    /// A user's reservations, newest first.
    pub fn reservations_of(&self, account: &str) -> Vec<&Reservation> {
        let mut found: Vec<&Reservation> = self.reservations().filter(|r| r.user_account == account).collect();
        found.sort_by_key(|r| (Reverse(r.created_at), Reverse(r.seq)));
        found
    }

    /// Every reservation, newest first.
    pub fn all_reservations(&self) -> Vec<&Reservation> {
        let mut found: Vec<&Reservation> = self.reservations().collect();
        found.sort_by_key(|r| (Reverse(r.created_at), Reverse(r.seq)));
        found
    }

    pub fn reservation_view(&self, r: &Reservation) -> Option<ReservationView> {
        let slot = self.slot(&r.slot_id)?;
        let court = self.court(&slot.court_id)?;
        let venue = self.venue(&court.venue_id)?;
        Some(ReservationView {
            id: r.id,
            user: r.user_account.clone(),
            venue: venue.name.clone(),
            court: court.name.clone(),
            date: slot.date,
            start: slot.start_time,
            end: slot.end_time,
            status: r.status,
        })
    }
}

impl Txn<'_> {
    pub fn reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.tables()
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Append a reservation row. Occupancy is the caller's business.
    pub fn create_reservation(&mut self, account: &str, slot_id: Ulid, status: ReservationStatus) -> Ulid {
        let id = Ulid::new();
        let reservation = Reservation {
            id,
            seq: self.tables().next_seq(),
            user_account: account.to_string(),
            slot_id,
            status,
            created_at: self.now(),
            cancelled_at: None,
        };
        self.apply(Event::ReservationCreated { reservation });
        id
    }

    /// Move a reservation along the state machine. Returns the row as it was
    /// before the move.
    pub fn transition(&mut self, id: Ulid, to: ReservationStatus) -> Result<Reservation, EngineError> {
        let before = self.reservation(id)?;
        if !before.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from: before.status, to });
        }
        let at = self.now();
        self.apply(Event::ReservationTransitioned { id, status: to, at });
        Ok(before)
    }

    pub fn delete_reservation(&mut self, id: Ulid) -> Result<Reservation, EngineError> {
        let before = self.reservation(id)?;
        self.apply(Event::ReservationDeleted { id });
        Ok(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use chrono::{Duration, NaiveDate};

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 5).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    #[test]
    fn transition_enforces_state_machine() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let mut txn = Txn::new(&mut tables, &cfg, now());
        let slot = Ulid::new();
        let id = txn.create_reservation("s1", slot, ReservationStatus::Queued);

        let err = txn.transition(id, ReservationStatus::NoShow).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let before = txn.transition(id, ReservationStatus::Confirmed).unwrap();
        assert_eq!(before.status, ReservationStatus::Queued);
        txn.transition(id, ReservationStatus::Cancelled).unwrap();
        let r = txn.reservation(id).unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);
        assert_eq!(r.cancelled_at, Some(now()));

        assert!(txn.transition(id, ReservationStatus::Confirmed).is_err());
    }

    #[test]
    fn active_for_ignores_terminal_rows() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let slot = Ulid::new();
        let id = {
            let mut txn = Txn::new(&mut tables, &cfg, now());
            let id = txn.create_reservation("s1", slot, ReservationStatus::Confirmed);
            txn.transition(id, ReservationStatus::Cancelled).unwrap();
            txn.create_reservation("s1", slot, ReservationStatus::Queued)
        };
        assert_eq!(tables.active_for("s1", &slot).map(|r| r.id), Some(id));
        assert!(tables.active_for("s2", &slot).is_none());
    }

    #[test]
    fn history_is_newest_first() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let first = {
            let mut txn = Txn::new(&mut tables, &cfg, now());
            txn.create_reservation("s1", Ulid::new(), ReservationStatus::Confirmed)
        };
        let second = {
            let mut txn = Txn::new(&mut tables, &cfg, now() + Duration::minutes(5));
            txn.create_reservation("s1", Ulid::new(), ReservationStatus::Confirmed)
        };
        let third = {
            let mut txn = Txn::new(&mut tables, &cfg, now() + Duration::minutes(5));
            txn.create_reservation("s1", Ulid::new(), ReservationStatus::Confirmed)
        };
        let ids: Vec<Ulid> = tables.reservations_of("s1").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third, second, first]);
    }
}
