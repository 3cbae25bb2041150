use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationStatus;

/// Coarse classification callers (and the wire layer) branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; the store was never touched.
    Validation,
    /// An expected, user-facing refusal.
    BusinessRule,
    /// Lost a race for the last unit of capacity.
    Conflict,
    /// Infrastructure failure; the transaction was rolled back.
    System,
}

#[derive(Debug)]
pub enum EngineError {
    Invalid(String),
    LimitExceeded(&'static str),
    UserNotFound(String),
    VenueNotFound(Ulid),
    CourtNotFound(Ulid),
    SlotNotFound(Ulid),
    ReservationNotFound(Ulid),
    ScheduleNotFound(Ulid),
    AnnouncementNotFound(Ulid),
    AccountExists(String),
    InvalidCredentials,
    BookingSuspended { credit: i32 },
    OutsideBookingWindow(NaiveDate),
    SlotEnded(Ulid),
    /// A student tried to book inside a teacher's locked range.
    ScheduleConflict,
    /// A new schedule clashes with one held by the named teacher.
    ScheduleOverlap(String),
    AlreadyQueued,
    DuplicateBooking,
    SlotFull(Ulid),
    HotSlotCreditTooLow { credit: i32 },
    AlreadyCancelled,
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    CheckInClosed,
    NotTeacher(String),
    VenueHasNoCourts(Ulid),
    HasChildren(Ulid),
    /// `try_occupy` found the slot full after every check passed.
    Contention(Ulid),
    MaintenanceInProgress,
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Invalid(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::Contention(_) => ErrorKind::Conflict,
            EngineError::MaintenanceInProgress | EngineError::WalError(_) => ErrorKind::System,
            _ => ErrorKind::BusinessRule,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::UserNotFound(account) => write!(f, "user not found: {account}"),
            EngineError::VenueNotFound(id) => write!(f, "venue not found: {id}"),
            EngineError::CourtNotFound(id) => write!(f, "court not found: {id}"),
            EngineError::SlotNotFound(id) => write!(f, "slot not found: {id}"),
            EngineError::ReservationNotFound(id) => {
                write!(f, "reservation not found or not yours: {id}")
            }
            EngineError::ScheduleNotFound(id) => write!(f, "schedule not found: {id}"),
            EngineError::AnnouncementNotFound(id) => write!(f, "announcement not found: {id}"),
            EngineError::AccountExists(account) => write!(f, "account already exists: {account}"),
            EngineError::InvalidCredentials => write!(f, "wrong account or password"),
            EngineError::BookingSuspended { credit } => write!(
                f,
                "booking suspended: credit score {credit} is at or below the limit, restored one week after the last deduction"
            ),
            EngineError::OutsideBookingWindow(date) => {
                write!(f, "{date} is outside the booking window")
            }
            EngineError::SlotEnded(id) => write!(f, "slot {id} has already ended"),
            EngineError::ScheduleConflict => write!(f, "occupied by instructor schedule"),
            EngineError::ScheduleOverlap(teacher) => {
                write!(f, "overlaps another teacher's schedule ({teacher})")
            }
            EngineError::AlreadyQueued => write!(f, "already queued for this slot"),
            EngineError::DuplicateBooking => write!(f, "duplicate booking"),
            EngineError::SlotFull(_) | EngineError::Contention(_) => write!(f, "slot full"),
            EngineError::HotSlotCreditTooLow { credit } => {
                write!(f, "credit too low for hot slot ({credit})")
            }
            EngineError::AlreadyCancelled => write!(f, "already cancelled"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move reservation from {from} to {to}")
            }
            EngineError::CheckInClosed => write!(f, "check-in closed: the slot has ended"),
            EngineError::NotTeacher(account) => {
                write!(f, "only teachers may manage schedules ({account})")
            }
            EngineError::VenueHasNoCourts(id) => write!(f, "venue {id} has no courts"),
            EngineError::HasChildren(id) => write!(f, "cannot delete {id}: still referenced"),
            EngineError::MaintenanceInProgress => write!(f, "maintenance already running"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_reads_as_slot_full_but_is_its_own_kind() {
        let id = Ulid::new();
        let race = EngineError::Contention(id);
        let full = EngineError::SlotFull(id);
        assert_eq!(race.to_string(), full.to_string());
        assert_eq!(race.kind(), ErrorKind::Conflict);
        assert_eq!(full.kind(), ErrorKind::BusinessRule);
    }

    #[test]
    fn kinds() {
        assert_eq!(EngineError::Invalid("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(EngineError::LimitExceeded("x").kind(), ErrorKind::Validation);
        assert_eq!(EngineError::WalError("x".into()).kind(), ErrorKind::System);
        assert_eq!(EngineError::DuplicateBooking.kind(), ErrorKind::BusinessRule);
    }

    #[test]
    fn teacher_overlap_reads_differently_from_student_conflict() {
        let overlap = EngineError::ScheduleOverlap("prof".into());
        assert_eq!(overlap.to_string(), "overlaps another teacher's schedule (prof)");
        assert_ne!(overlap.to_string(), EngineError::ScheduleConflict.to_string());
        assert_eq!(overlap.kind(), ErrorKind::BusinessRule);
    }
}
