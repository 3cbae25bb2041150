use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::*;

/// Before-image of whatever an event touched, so a transaction can be rolled
/// back by replaying its undo log in reverse.
#[derive(Debug, Clone)]
pub enum Undo {
    User(String, Option<User>),
    Venue(Ulid, Option<Venue>),
    Court(Ulid, Option<Court>),
    Slot(Ulid, Option<TimeSlot>),
    Reservation(Ulid, Option<Reservation>),
    Schedule(Ulid, Option<ClassSchedule>),
    Announcement(Ulid, Option<Announcement>),
    CreditLogLen(usize),
    /// Point references to `from` back at `to`.
    Rename { from: String, to: String },
    Seq(u64),
}

/// The whole store, owned by the engine behind a single lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    users: BTreeMap<String, User>,
    venues: BTreeMap<Ulid, Venue>,
    courts: BTreeMap<Ulid, Court>,
    slots: BTreeMap<Ulid, TimeSlot>,
    /// (court, date, start) → slot
    slot_index: BTreeMap<(Ulid, NaiveDate, NaiveTime), Ulid>,
    reservations: BTreeMap<Ulid, Reservation>,
    /// slot → reservations on it
    by_slot: BTreeMap<Ulid, BTreeSet<Ulid>>,
    schedules: BTreeMap<Ulid, ClassSchedule>,
    announcements: BTreeMap<Ulid, Announcement>,
    credit_logs: Vec<CreditLog>,
    next_seq: u64,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn user(&self, account: &str) -> Option<&User> {
        self.users.get(account)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn venue(&self, id: &Ulid) -> Option<&Venue> {
        self.venues.get(id)
    }

    pub fn venues(&self) -> impl Iterator<Item = &Venue> {
        self.venues.values()
    }

    pub fn court(&self, id: &Ulid) -> Option<&Court> {
        self.courts.get(id)
    }

    pub fn courts(&self) -> impl Iterator<Item = &Court> {
        self.courts.values()
    }

    /// Courts of a venue ordered by name.
    pub fn courts_of(&self, venue_id: &Ulid) -> Vec<&Court> {
        let mut courts: Vec<&Court> = self.courts.values().filter(|c| c.venue_id == *venue_id).collect();
        courts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        courts
    }

    pub fn slot(&self, id: &Ulid) -> Option<&TimeSlot> {
        self.slots.get(id)
    }

    pub fn slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.values()
    }

    pub fn slot_at(&self, court_id: Ulid, date: NaiveDate, start: NaiveTime) -> Option<&TimeSlot> {
        self.slot_index
            .get(&(court_id, date, start))
            .and_then(|id| self.slots.get(id))
    }

    /// Slots of one court in `[from, to]`, in date/start order.
    pub fn slots_of_court(&self, court_id: Ulid, from: NaiveDate, to: NaiveDate) -> Vec<&TimeSlot> {
        if from > to {
            return Vec::new();
        }
        let upper = match to.succ_opt() {
            Some(next) => Bound::Excluded((court_id, next, NaiveTime::MIN)),
            None => Bound::Unbounded,
        };
        self.slot_index
            .range((Bound::Included((court_id, from, NaiveTime::MIN)), upper))
            .take_while(|((court, date, _), _)| *court == court_id && *date <= to)
            .filter_map(|(_, id)| self.slots.get(id))
            .collect()
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn reservations_on(&self, slot_id: &Ulid) -> impl Iterator<Item = &Reservation> {
        self.by_slot
            .get(slot_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.reservations.get(id))
    }

    pub fn has_reservations(&self, slot_id: &Ulid) -> bool {
        self.by_slot.get(slot_id).is_some_and(|ids| !ids.is_empty())
    }

    pub fn schedule(&self, id: &Ulid) -> Option<&ClassSchedule> {
        self.schedules.get(id)
    }

    pub fn schedules(&self) -> impl Iterator<Item = &ClassSchedule> {
        self.schedules.values()
    }

    pub fn announcement(&self, id: &Ulid) -> Option<&Announcement> {
        self.announcements.get(id)
    }

    pub fn announcements(&self) -> impl Iterator<Item = &Announcement> {
        self.announcements.values()
    }

    pub fn credit_logs(&self) -> &[CreditLog] {
        &self.credit_logs
    }

    /// Timestamp of the user's most recent deduction.
    pub fn last_deduction(&self, account: &str) -> Option<NaiveDateTime> {
        self.credit_logs
            .iter()
            .filter(|l| l.user_account == account && l.delta < 0)
            .map(|l| l.at)
            .max()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    // ── Row helpers (keep indexes in step) ──────────────────

    fn put_slot(&mut self, slot: TimeSlot) -> Option<TimeSlot> {
        let prev = self.remove_slot(&slot.id);
        self.slot_index.insert((slot.court_id, slot.date, slot.start_time), slot.id);
        self.slots.insert(slot.id, slot);
        prev
    }

    fn remove_slot(&mut self, id: &Ulid) -> Option<TimeSlot> {
        let prev = self.slots.remove(id)?;
        self.slot_index.remove(&(prev.court_id, prev.date, prev.start_time));
        Some(prev)
    }

    fn put_reservation(&mut self, r: Reservation) -> Option<Reservation> {
        let prev = self.remove_reservation(&r.id);
        self.by_slot.entry(r.slot_id).or_default().insert(r.id);
        self.reservations.insert(r.id, r);
        prev
    }

    fn remove_reservation(&mut self, id: &Ulid) -> Option<Reservation> {
        let prev = self.reservations.remove(id)?;
        if let Some(ids) = self.by_slot.get_mut(&prev.slot_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_slot.remove(&prev.slot_id);
            }
        }
        Some(prev)
    }

    fn rename_references(&mut self, from: &str, to: &str) {
        for r in self.reservations.values_mut().filter(|r| r.user_account == from) {
            r.user_account = to.to_string();
        }
        for s in self.schedules.values_mut().filter(|s| s.teacher_account == from) {
            s.teacher_account = to.to_string();
        }
        for l in self.credit_logs.iter_mut().filter(|l| l.user_account == from) {
            l.user_account = to.to_string();
        }
        for a in self
            .announcements
            .values_mut()
            .filter(|a| a.author_account.as_deref() == Some(from))
        {
            a.author_account = Some(to.to_string());
        }
    }

    fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, prev: Option<V>) {
        match prev {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event, returning what is needed to undo it. Events that
    /// reference missing rows are no-ops.
    pub fn apply(&mut self, event: &Event) -> Vec<Undo> {
        let mut undo = Vec::with_capacity(1);
        match event {
            Event::UserRegistered { user } => {
                let prev = self.users.insert(user.account.clone(), user.clone());
                undo.push(Undo::User(user.account.clone(), prev));
            }
            Event::UserUpdated { account, user } => {
                let Some(prev) = self.users.remove(account) else {
                    return undo;
                };
                undo.push(Undo::User(account.clone(), Some(prev)));
                if user.account != *account {
                    let displaced = self.users.remove(&user.account);
                    undo.push(Undo::User(user.account.clone(), displaced));
                    self.rename_references(account, &user.account);
                    undo.push(Undo::Rename {
                        from: user.account.clone(),
                        to: account.clone(),
                    });
                }
                self.users.insert(user.account.clone(), user.clone());
            }
            Event::UserDeleted { account } => {
                let prev = self.users.remove(account);
                undo.push(Undo::User(account.clone(), prev));
            }
            Event::CreditScoreSet { account, score } => {
                if let Some(u) = self.users.get_mut(account) {
                    undo.push(Undo::User(account.clone(), Some(u.clone())));
                    u.credit_score = *score;
                }
            }
            Event::CreditLogged { log } => {
                undo.push(Undo::CreditLogLen(self.credit_logs.len()));
                self.credit_logs.push(log.clone());
            }
            Event::VenueCreated { venue } | Event::VenueUpdated { venue } => {
                let prev = self.venues.insert(venue.id, venue.clone());
                undo.push(Undo::Venue(venue.id, prev));
            }
            Event::VenueDeleted { id } => {
                let prev = self.venues.remove(id);
                undo.push(Undo::Venue(*id, prev));
            }
            Event::CourtCreated { court } => {
                let prev = self.courts.insert(court.id, court.clone());
                undo.push(Undo::Court(court.id, prev));
            }
            Event::CourtDeleted { id } => {
                let prev = self.courts.remove(id);
                undo.push(Undo::Court(*id, prev));
            }
            Event::SlotCreated { slot } => {
                let prev = self.put_slot(slot.clone());
                undo.push(Undo::Slot(slot.id, prev));
            }
            Event::SlotOccupancySet { id, count } => {
                if let Some(s) = self.slots.get_mut(id) {
                    undo.push(Undo::Slot(*id, Some(s.clone())));
                    s.current_count = (*count).min(s.max_capacity);
                }
            }
            Event::SlotHotSet { id, is_hot } => {
                if let Some(s) = self.slots.get_mut(id) {
                    undo.push(Undo::Slot(*id, Some(s.clone())));
                    s.is_hot = *is_hot;
                }
            }
            Event::SlotDeleted { id } => {
                let prev = self.remove_slot(id);
                undo.push(Undo::Slot(*id, prev));
            }
            Event::ReservationCreated { reservation } => {
                undo.push(Undo::Seq(self.next_seq));
                self.next_seq = self.next_seq.max(reservation.seq + 1);
                let prev = self.put_reservation(reservation.clone());
                undo.push(Undo::Reservation(reservation.id, prev));
            }
            Event::ReservationTransitioned { id, status, at } => {
                if let Some(r) = self.reservations.get_mut(id) {
                    undo.push(Undo::Reservation(*id, Some(r.clone())));
                    r.status = *status;
                    if matches!(
                        status,
                        ReservationStatus::Cancelled | ReservationStatus::CancelledByTeacher
                    ) {
                        r.cancelled_at = Some(*at);
                    }
                }
            }
            Event::ReservationDeleted { id } => {
                let prev = self.remove_reservation(id);
                undo.push(Undo::Reservation(*id, prev));
            }
            Event::ScheduleAdded { schedule } => {
                let prev = self.schedules.insert(schedule.id, schedule.clone());
                undo.push(Undo::Schedule(schedule.id, prev));
            }
            Event::ScheduleRemoved { id } => {
                let prev = self.schedules.remove(id);
                undo.push(Undo::Schedule(*id, prev));
            }
            Event::AnnouncementPosted { announcement } => {
                let prev = self.announcements.insert(announcement.id, announcement.clone());
                undo.push(Undo::Announcement(announcement.id, prev));
            }
            Event::AnnouncementDeleted { id } => {
                let prev = self.announcements.remove(id);
                undo.push(Undo::Announcement(*id, prev));
            }
        }
        undo
    }

    /// Undo entries in reverse order of recording.
    pub fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::User(account, prev) => Self::restore(&mut self.users, account, prev),
                Undo::Venue(id, prev) => Self::restore(&mut self.venues, id, prev),
                Undo::Court(id, prev) => Self::restore(&mut self.courts, id, prev),
                Undo::Schedule(id, prev) => Self::restore(&mut self.schedules, id, prev),
                Undo::Announcement(id, prev) => Self::restore(&mut self.announcements, id, prev),
                Undo::Slot(id, prev) => match prev {
                    Some(slot) => {
                        self.put_slot(slot);
                    }
                    None => {
                        self.remove_slot(&id);
                    }
                },
                Undo::Reservation(id, prev) => match prev {
                    Some(r) => {
                        self.put_reservation(r);
                    }
                    None => {
                        self.remove_reservation(&id);
                    }
                },
                Undo::CreditLogLen(len) => self.credit_logs.truncate(len),
                Undo::Rename { from, to } => self.rename_references(&from, &to),
                Undo::Seq(seq) => self.next_seq = seq,
            }
        }
    }

    /// Events that rebuild the current state from nothing. Used to compact the WAL.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.venues.values().map(|v| Event::VenueCreated { venue: v.clone() }));
        events.extend(self.courts.values().map(|c| Event::CourtCreated { court: c.clone() }));
        events.extend(self.users.values().map(|u| Event::UserRegistered { user: u.clone() }));
        events.extend(self.credit_logs.iter().map(|l| Event::CreditLogged { log: l.clone() }));
        events.extend(self.slots.values().map(|s| Event::SlotCreated { slot: s.clone() }));
        events.extend(
            self.schedules
                .values()
                .map(|s| Event::ScheduleAdded { schedule: s.clone() }),
        );
        events.extend(
            self.reservations
                .values()
                .map(|r| Event::ReservationCreated { reservation: r.clone() }),
        );
        events.extend(
            self.announcements
                .values()
                .map(|a| Event::AnnouncementPosted { announcement: a.clone() }),
        );
        events
    }
}
