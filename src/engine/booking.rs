use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::{Engine, EngineError, Txn};
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, BOOKING_CONTENTION_TOTAL};
use crate::time::{has_ended, in_window};

impl Txn<'_> {
    pub fn user(&self, account: &str) -> Result<User, EngineError> {
        self.tables()
            .user(account)
            .cloned()
            .ok_or_else(|| EngineError::UserNotFound(account.to_string()))
    }

    fn book(&mut self, account: &str, slot_id: Ulid) -> Result<BookingOutcome, EngineError> {
        let cfg = self.config();
        let user = self.user(account)?;
        if user.credit_score <= cfg.suspend_at_or_below {
            return Err(EngineError::BookingSuspended {
                credit: user.credit_score,
            });
        }

        let slot = self.slot(slot_id)?;
        let court = self
            .tables()
            .court(&slot.court_id)
            .cloned()
            .ok_or(EngineError::CourtNotFound(slot.court_id))?;
        if self.tables().venue(&court.venue_id).is_none() {
            return Err(EngineError::VenueNotFound(court.venue_id));
        }
        if !in_window(slot.date, self.today(), cfg.window_days) {
            return Err(EngineError::OutsideBookingWindow(slot.date));
        }
        if has_ended(slot.date, slot.end_time, self.now()) {
            return Err(EngineError::SlotEnded(slot_id));
        }

        if user.role == Role::Student
            && self
                .tables()
                .schedule_covering(&court.venue_id, slot.date, slot.start_time, slot.end_time)
                .is_some()
        {
            return Err(EngineError::ScheduleConflict);
        }

        let holds_active = self.tables().active_for(account, &slot_id).is_some();

        if cfg.special_hot.applies(&slot) && slot.is_full() {
            if holds_active {
                return Err(EngineError::AlreadyQueued);
            }
            let reservation_id = self.create_reservation(account, slot_id, ReservationStatus::Queued);
            return Ok(BookingOutcome::Queued { reservation_id });
        }

        if holds_active {
            return Err(EngineError::DuplicateBooking);
        }
        if slot.is_full() {
            return Err(EngineError::SlotFull(slot_id));
        }
        if slot.is_hot && user.credit_score <= cfg.hot_slot_credit_floor {
            return Err(EngineError::HotSlotCreditTooLow {
                credit: user.credit_score,
            });
        }

        if !self.try_occupy(slot_id)? {
            return Err(EngineError::Contention(slot_id));
        }
        let reservation_id = self.create_reservation(account, slot_id, ReservationStatus::Confirmed);
        Ok(BookingOutcome::Confirmed { reservation_id })
    }

    /// Cancel on the user's behalf. A confirmed reservation gives its unit
    /// back, which goes to the waitlist while the slot is still running.
    pub fn cancel_reservation(&mut self, id: Ulid) -> Result<CancelOutcome, EngineError> {
        let r = self.reservation(id)?;
        match r.status {
            ReservationStatus::Cancelled => Err(EngineError::AlreadyCancelled),
            ReservationStatus::Queued => {
                self.transition(id, ReservationStatus::Cancelled)?;
                Ok(CancelOutcome::Dequeued)
            }
            ReservationStatus::Confirmed => {
                self.transition(id, ReservationStatus::Cancelled)?;
                self.release(r.slot_id)?;
                let slot = self.slot(r.slot_id)?;
                let promoted = if has_ended(slot.date, slot.end_time, self.now()) {
                    None
                } else {
                    self.promote_next(r.slot_id)?
                };
                Ok(CancelOutcome::Released { promoted })
            }
            from => Err(EngineError::InvalidTransition {
                from,
                to: ReservationStatus::Cancelled,
            }),
        }
    }

    fn owned_reservation(&self, account: &str, id: Ulid) -> Result<Reservation, EngineError> {
        self.tables()
            .reservation(&id)
            .filter(|r| r.user_account == account)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    fn check_in(&mut self, account: &str, id: Ulid) -> Result<(), EngineError> {
        let r = self.owned_reservation(account, id)?;
        if r.status != ReservationStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                from: r.status,
                to: ReservationStatus::CheckedIn,
            });
        }
        let slot = self.slot(r.slot_id)?;
        if has_ended(slot.date, slot.end_time, self.now()) {
            return Err(EngineError::CheckInClosed);
        }
        self.transition(id, ReservationStatus::CheckedIn)?;
        Ok(())
    }
}

impl Engine {
    /// Book one unit of `slot_id` for `account`, or join its waitlist when the
    /// slot is a full special-hot slot.
    pub async fn book(&self, account: &str, slot_id: Ulid) -> Result<BookingOutcome, EngineError> {
        let result = self.transact("book", |txn| txn.book(account, slot_id)).await;
        match &result {
            Ok(outcome) => {
                let label = match outcome {
                    BookingOutcome::Confirmed { .. } => "confirmed",
                    BookingOutcome::Queued { .. } => "queued",
                };
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => label).increment(1);
                info!(%account, slot = %slot_id, reservation = %outcome.reservation_id(), outcome = label, "booked");
            }
            Err(EngineError::Contention(_)) => {
                metrics::counter!(BOOKING_CONTENTION_TOTAL).increment(1);
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "contention").increment(1);
                warn!(%account, slot = %slot_id, "lost the race for the last unit");
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "rejected").increment(1);
                debug!(%account, slot = %slot_id, error = %e, "booking rejected");
            }
        }
        result
    }

    pub async fn cancel(&self, account: &str, reservation_id: Ulid) -> Result<CancelOutcome, EngineError> {
        let outcome = self
            .transact("cancel", |txn| {
                txn.owned_reservation(account, reservation_id)?;
                txn.cancel_reservation(reservation_id)
            })
            .await?;
        info!(%account, reservation = %reservation_id, ?outcome, "cancelled");
        Ok(outcome)
    }

    pub async fn check_in(&self, account: &str, reservation_id: Ulid) -> Result<(), EngineError> {
        self.transact("check_in", |txn| txn.check_in(account, reservation_id))
            .await?;
        info!(%account, reservation = %reservation_id, "checked in");
        Ok(())
    }

    /// Slots of a venue on a day inside the booking window.
    pub async fn list_available_slots(&self, venue_id: Ulid, date: NaiveDate) -> Result<Vec<SlotView>, EngineError> {
        let window_days = self.config().window_days;
        self.view(|tables, now| {
            if tables.venue(&venue_id).is_none() {
                return Err(EngineError::VenueNotFound(venue_id));
            }
            if !in_window(date, now.date(), window_days) {
                return Err(EngineError::OutsideBookingWindow(date));
            }
            Ok(tables
                .find_slots(&venue_id, date)
                .into_iter()
                .map(|(slot, court)| SlotView {
                    slot_id: slot.id,
                    court_name: court.name.clone(),
                    start: slot.start_time,
                    end: slot.end_time,
                    current: slot.current_count,
                    max: slot.max_capacity,
                    is_hot: slot.is_hot,
                })
                .collect())
        })
        .await
    }

    /// The user's reservation history, newest first.
    pub async fn list_my_reservations(&self, account: &str) -> Result<Vec<ReservationView>, EngineError> {
        self.view(|tables, _| {
            if tables.user(account).is_none() {
                return Err(EngineError::UserNotFound(account.to_string()));
            }
            Ok(tables
                .reservations_of(account)
                .into_iter()
                .filter_map(|r| tables.reservation_view(r))
                .collect())
        })
        .await
    }
}
