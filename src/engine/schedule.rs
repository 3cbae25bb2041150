use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use tracing::{debug, info};
use ulid::Ulid;

use super::{Engine, EngineError, Tables, Txn};
use crate::model::*;
use crate::time::{
    add_months_clamped, dates_on_weekday, has_ended, hour_blocks, ranges_overlap, weekday_index, window_end,
};

impl Tables {
    /// An active schedule at `venue_id` whose weekly range overlaps
    /// `[start, end)` on `date`.
    pub fn schedule_covering(
        &self,
        venue_id: &Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Option<&ClassSchedule> {
        self.schedules().find(|s| {
            s.venue_id == *venue_id
                && s.day_of_week == date.weekday()
                && s.covers_date(date)
                && ranges_overlap(s.start_time, s.end_time, start, end)
        })
    }
}

impl Txn<'_> {
    fn teacher(&self, account: &str) -> Result<User, EngineError> {
        let user = self.user(account)?;
        if user.role != Role::Teacher {
            return Err(EngineError::NotTeacher(account.to_string()));
        }
        Ok(user)
    }

    /// Take over an existing slot for `teacher`: displace other confirmed
    /// bookings, force the slot full and make sure the teacher holds it.
    fn lock_slot(&mut self, slot_id: Ulid, teacher: &str) -> Result<usize, EngineError> {
        let displaced: Vec<Ulid> = self
            .tables()
            .on_slot_with(&slot_id, ReservationStatus::Confirmed)
            .into_iter()
            .filter(|r| r.user_account != teacher)
            .map(|r| r.id)
            .collect();
        for id in &displaced {
            self.transition(*id, ReservationStatus::CancelledByTeacher)?;
            debug!(reservation = %id, slot = %slot_id, "displaced by schedule lock");
        }
        self.force_occupy(slot_id)?;

        match self.tables().active_for(teacher, &slot_id).map(|r| (r.id, r.status)) {
            Some((_, ReservationStatus::Confirmed)) => {}
            Some((id, _)) => {
                self.transition(id, ReservationStatus::Confirmed)?;
            }
            None => {
                self.create_reservation(teacher, slot_id, ReservationStatus::Confirmed);
            }
        }
        Ok(displaced.len())
    }

    fn add_schedule(
        &mut self,
        teacher: &str,
        venue_id: Ulid,
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<ScheduleReceipt, EngineError> {
        let cfg = self.config();
        self.teacher(teacher)?;
        let blocks = hour_blocks(start, end)?;
        if self.tables().venue(&venue_id).is_none() {
            return Err(EngineError::VenueNotFound(venue_id));
        }
        let courts: Vec<Ulid> = self.tables().courts_of(&venue_id).iter().map(|c| c.id).collect();
        if courts.is_empty() {
            return Err(EngineError::VenueHasNoCourts(venue_id));
        }

        let today = self.today();
        let clash = self.tables().schedules().find(|s| {
            s.venue_id == venue_id
                && s.day_of_week == day
                && s.teacher_account != teacher
                && s.covers_date(today)
                && ranges_overlap(s.start_time, s.end_time, start, end)
        });
        if let Some(other) = clash {
            return Err(EngineError::ScheduleOverlap(other.teacher_account.clone()));
        }

        let expiry_date = add_months_clamped(today, cfg.schedule_horizon_months);
        let schedule_id = Ulid::new();
        self.apply(Event::ScheduleAdded {
            schedule: ClassSchedule {
                id: schedule_id,
                teacher_account: teacher.to_string(),
                venue_id,
                day_of_week: day,
                start_time: start,
                end_time: end,
                expiry_date: Some(expiry_date),
            },
        });

        let mut receipt = ScheduleReceipt {
            schedule_id,
            expiry_date,
            slots_locked: 0,
            slots_created: 0,
            displaced: 0,
        };
        let now = self.now();
        for date in dates_on_weekday(today, expiry_date, day) {
            for &court_id in &courts {
                for block in &blocks {
                    if has_ended(date, block.end, now) {
                        continue;
                    }
                    match self.tables().slot_at(court_id, date, block.start).map(|s| s.id) {
                        Some(slot_id) => {
                            receipt.displaced += self.lock_slot(slot_id, teacher)?;
                        }
                        None => {
                            let slot_id = self.create_slot(court_id, date, *block, 1, 1)?;
                            self.create_reservation(teacher, slot_id, ReservationStatus::Confirmed);
                            receipt.slots_created += 1;
                        }
                    }
                    receipt.slots_locked += 1;
                }
            }
        }
        Ok(receipt)
    }

    /// Undo the lock of one schedule. Slots past the booking window that only
    /// ever served the lock are deleted; the rest reopen and feed the waitlist.
    /// Rows that survived the lock (checked in) keep their units.
    pub(super) fn remove_schedule(&mut self, teacher: &str, schedule_id: Ulid) -> Result<UnlockReceipt, EngineError> {
        let cfg = self.config();
        let schedule = self
            .tables()
            .schedule(&schedule_id)
            .filter(|s| s.teacher_account == teacher)
            .cloned()
            .ok_or(EngineError::ScheduleNotFound(schedule_id))?;
        self.apply(Event::ScheduleRemoved { id: schedule_id });

        let blocks = hour_blocks(schedule.start_time, schedule.end_time)?;
        let today = self.today();
        let expiry = schedule
            .expiry_date
            .unwrap_or_else(|| add_months_clamped(today, cfg.schedule_horizon_months));
        let last_public_day = window_end(today, cfg.window_days);
        let courts: Vec<Ulid> = self
            .tables()
            .courts_of(&schedule.venue_id)
            .iter()
            .map(|c| c.id)
            .collect();

        let mut receipt = UnlockReceipt {
            slots_released: 0,
            slots_deleted: 0,
            promoted: 0,
        };
        for date in dates_on_weekday(today, expiry, schedule.day_of_week) {
            for &court_id in &courts {
                for block in &blocks {
                    let Some(slot_id) = self.tables().slot_at(court_id, date, block.start).map(|s| s.id) else {
                        continue;
                    };
                    if self
                        .tables()
                        .schedule_covering(&schedule.venue_id, date, block.start, block.end)
                        .is_some()
                    {
                        continue;
                    }
                    let held = self
                        .tables()
                        .active_for(teacher, &slot_id)
                        .filter(|r| r.status == ReservationStatus::Confirmed)
                        .map(|r| r.id);
                    let Some(reservation_id) = held else {
                        continue;
                    };

                    self.transition(reservation_id, ReservationStatus::Cancelled)?;
                    self.recount(slot_id)?;
                    receipt.slots_released += 1;

                    let only_lock_rows = self.tables().reservations_on(&slot_id).all(|r| r.user_account == teacher);
                    if date > last_public_day && only_lock_rows {
                        let rows: Vec<Ulid> = self.tables().reservations_on(&slot_id).map(|r| r.id).collect();
                        for id in rows {
                            self.delete_reservation(id)?;
                        }
                        self.delete_slot(slot_id)?;
                        receipt.slots_deleted += 1;
                    } else {
                        receipt.promoted += self.promote_all(slot_id)?;
                    }
                }
            }
        }
        Ok(receipt)
    }
}

impl Engine {
    /// Lock every court of `venue_id` for `teacher` on `day` between `start`
    /// and `end`, for the configured horizon.
    pub async fn add_schedule(
        &self,
        teacher: &str,
        venue_id: Ulid,
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<ScheduleReceipt, EngineError> {
        let receipt = self
            .transact("add_schedule", |txn| txn.add_schedule(teacher, venue_id, day, start, end))
            .await?;
        info!(
            %teacher,
            venue = %venue_id,
            ?day,
            schedule = %receipt.schedule_id,
            locked = receipt.slots_locked,
            created = receipt.slots_created,
            displaced = receipt.displaced,
            expiry = %receipt.expiry_date,
            "schedule locked"
        );
        Ok(receipt)
    }

    pub async fn remove_schedule(&self, teacher: &str, schedule_id: Ulid) -> Result<UnlockReceipt, EngineError> {
        let receipt = self
            .transact("remove_schedule", |txn| txn.remove_schedule(teacher, schedule_id))
            .await?;
        info!(
            %teacher,
            schedule = %schedule_id,
            released = receipt.slots_released,
            deleted = receipt.slots_deleted,
            promoted = receipt.promoted,
            "schedule unlocked"
        );
        Ok(receipt)
    }

    pub async fn list_schedules(&self, teacher: &str) -> Result<Vec<ScheduleView>, EngineError> {
        self.view(|tables, _| {
            if tables.user(teacher).is_none() {
                return Err(EngineError::UserNotFound(teacher.to_string()));
            }
            let mut views: Vec<ScheduleView> = tables
                .schedules()
                .filter(|s| s.teacher_account == teacher)
                .map(|s| ScheduleView {
                    id: s.id,
                    venue: tables.venue(&s.venue_id).map(|v| v.name.clone()).unwrap_or_default(),
                    day_of_week: weekday_index(s.day_of_week),
                    start: s.start_time,
                    end: s.end_time,
                    expiry_date: s.expiry_date,
                })
                .collect();
            views.sort_by_key(|v| (v.day_of_week, v.start));
            Ok(views)
        })
        .await
    }
}
