use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub account: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub credit_score: i32,
    pub created_at: NaiveDateTime,
}

/// Venue type. Gyms and pools are open-floor venues whose generated slots
/// hold many people; everything else is one party per court.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    Court,
    Gym,
    Pool,
}

impl VenueKind {
    pub fn is_large_capacity(self) -> bool {
        matches!(self, VenueKind::Gym | VenueKind::Pool)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Ulid,
    pub name: String,
    pub kind: VenueKind,
    pub is_outdoor: bool,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_capacity: u32,
    /// Always within `0..=max_capacity`.
    pub current_count: u32,
    /// Credit-gated slot, set by administrators.
    pub is_hot: bool,
}

impl TimeSlot {
    pub fn is_full(&self) -> bool {
        self.current_count >= self.max_capacity
    }

    pub fn end_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Queued,
    Confirmed,
    CheckedIn,
    NoShow,
    Cancelled,
    CancelledByTeacher,
}

impl ReservationStatus {
    /// Queued or confirmed: the user still has a claim on the slot.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Queued | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Confirmed or checked in: the row occupies one unit of the slot.
    pub fn holds_unit(self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::CheckedIn)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Queued, Confirmed)
                | (Queued, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, NoShow)
                | (Confirmed, Cancelled)
                | (Confirmed, CancelledByTeacher)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Queued => "queued",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::NoShow => "no_show",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::CancelledByTeacher => "cancelled_by_teacher",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Store-wide creation order; breaks `created_at` ties in the waitlist.
    pub seq: u64,
    pub user_account: String,
    pub slot_id: Ulid,
    pub status: ReservationStatus,
    pub created_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
}

/// A teacher's recurring weekly lock on every court of a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSchedule {
    pub id: Ulid,
    pub teacher_account: String,
    pub venue_id: Ulid,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Last date the lock was materialized for. `None` on rows written before
    /// expiry tracking existed.
    pub expiry_date: Option<NaiveDate>,
}

impl ClassSchedule {
    /// Whether the schedule still binds on `date`.
    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.expiry_date.is_none_or(|exp| exp >= date)
    }
}

/// A notice on the board. Administrators date their own; user posts run
/// from the day they are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Ulid,
    pub title: String,
    pub content: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: NaiveDateTime,
    pub author_account: Option<String>,
}

impl Announcement {
    pub fn is_current(&self, today: NaiveDate) -> bool {
        self.end_date >= today
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLog {
    pub user_account: String,
    pub delta: i32,
    pub reason: CreditReason,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    NoShow,
    SuspensionLifted,
    AdminAdjustment,
}

/// Optional fields an administrator may change on a user. Unset fields are
/// left alone; the patch is applied in one `UserUpdated` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    pub account: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub credit_score: Option<i32>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self == &UserPatch::default()
    }

    /// Produce the updated row. Blank strings count as "not provided".
    pub fn apply(&self, user: &User) -> User {
        fn pick(v: &Option<String>) -> Option<String> {
            v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        User {
            account: pick(&self.account).unwrap_or_else(|| user.account.clone()),
            password: pick(&self.password).unwrap_or_else(|| user.password.clone()),
            name: pick(&self.name).unwrap_or_else(|| user.name.clone()),
            phone: pick(&self.phone).or_else(|| user.phone.clone()),
            role: self.role.unwrap_or(user.role),
            credit_score: self.credit_score.unwrap_or(user.credit_score),
            created_at: user.created_at,
        }
    }
}

/// Row-level change records. Every committed transaction is a batch of these;
/// they are the WAL record format and replaying them rebuilds the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    /// Replaces the row stored under `account`; `user.account` may differ
    /// (rename), in which case references follow.
    UserUpdated {
        account: String,
        user: User,
    },
    UserDeleted {
        account: String,
    },
    CreditScoreSet {
        account: String,
        score: i32,
    },
    CreditLogged {
        log: CreditLog,
    },
    VenueCreated {
        venue: Venue,
    },
    VenueUpdated {
        venue: Venue,
    },
    VenueDeleted {
        id: Ulid,
    },
    CourtCreated {
        court: Court,
    },
    CourtDeleted {
        id: Ulid,
    },
    SlotCreated {
        slot: TimeSlot,
    },
    SlotOccupancySet {
        id: Ulid,
        count: u32,
    },
    SlotHotSet {
        id: Ulid,
        is_hot: bool,
    },
    SlotDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationTransitioned {
        id: Ulid,
        status: ReservationStatus,
        at: NaiveDateTime,
    },
    ReservationDeleted {
        id: Ulid,
    },
    ScheduleAdded {
        schedule: ClassSchedule,
    },
    ScheduleRemoved {
        id: Ulid,
    },
    AnnouncementPosted {
        announcement: Announcement,
    },
    AnnouncementDeleted {
        id: Ulid,
    },
}

/// One WAL frame: the events of a single committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub at: NaiveDateTime,
    pub events: Vec<Event>,
}

// ── Operation results ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingOutcome {
    Confirmed { reservation_id: Ulid },
    Queued { reservation_id: Ulid },
}

impl BookingOutcome {
    pub fn reservation_id(&self) -> Ulid {
        match self {
            BookingOutcome::Confirmed { reservation_id } | BookingOutcome::Queued { reservation_id } => {
                *reservation_id
            }
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            BookingOutcome::Confirmed { .. } => "booking confirmed",
            BookingOutcome::Queued { .. } => "slot full, added to the waitlist (credit priority)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// A queued reservation left the waitlist.
    Dequeued,
    /// A confirmed reservation released its unit, possibly to a waiter.
    Released { promoted: Option<Ulid> },
}

impl CancelOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            CancelOutcome::Dequeued => "left the waitlist",
            CancelOutcome::Released { .. } => "reservation cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReceipt {
    pub schedule_id: Ulid,
    pub expiry_date: NaiveDate,
    pub slots_locked: usize,
    pub slots_created: usize,
    pub displaced: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockReceipt {
    pub slots_released: usize,
    pub slots_deleted: usize,
    pub promoted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceSummary {
    pub no_shows: usize,
    pub stale_queued: usize,
    pub credits_restored: usize,
    pub restore_pending_manual: usize,
    pub slots_deleted: usize,
    pub slots_created: usize,
    /// Records that failed and were rolled back individually.
    pub skipped: usize,
}

impl fmt::Display for MaintenanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no-shows: {}, stale queued: {}, credits restored: {}, slots deleted: {}, slots created: {}, skipped: {}",
            self.no_shows,
            self.stale_queued,
            self.credits_restored,
            self.slots_deleted,
            self.slots_created,
            self.skipped
        )
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub account: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub credit_score: i32,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        Self {
            account: u.account.clone(),
            name: u.name.clone(),
            phone: u.phone.clone(),
            role: u.role,
            credit_score: u.credit_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub slot_id: Ulid,
    pub court_name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub current: u32,
    pub max: u32,
    pub is_hot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub user: String,
    pub venue: String,
    pub court: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleView {
    pub id: Ulid,
    pub venue: String,
    pub day_of_week: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub expiry_date: Option<NaiveDate>,
}

/// An announcement joined with its author. Notices without a known author
/// read as coming from the administration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnouncementView {
    pub id: Ulid,
    pub title: String,
    pub content: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: NaiveDateTime,
    pub author_name: String,
    pub author_role: Role,
    pub author_account: Option<String>,
}
