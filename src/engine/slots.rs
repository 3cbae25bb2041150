use chrono::NaiveDate;
use ulid::Ulid;

use super::{EngineError, Tables, Txn};
use crate::model::*;
use crate::time::HourBlock;

impl Tables {
    /// All slots of `venue_id` on `date`, ordered by start time then court name.
    pub fn find_slots(&self, venue_id: &Ulid, date: NaiveDate) -> Vec<(&TimeSlot, &Court)> {
        let mut found: Vec<(&TimeSlot, &Court)> = self
            .courts_of(venue_id)
            .into_iter()
            .flat_map(|court| {
                self.slots_of_court(court.id, date, date)
                    .into_iter()
                    .map(move |slot| (slot, court))
            })
            .collect();
        found.sort_by(|(a, ac), (b, bc)| a.start_time.cmp(&b.start_time).then_with(|| ac.name.cmp(&bc.name)));
        found
    }
}

impl Txn<'_> {
    pub fn slot(&self, id: Ulid) -> Result<TimeSlot, EngineError> {
        self.tables().slot(&id).cloned().ok_or(EngineError::SlotNotFound(id))
    }

    /// Take one unit of capacity. Returns false, changing nothing, when the
    /// slot is already full.
    pub fn try_occupy(&mut self, id: Ulid) -> Result<bool, EngineError> {
        let slot = self.slot(id)?;
        if slot.is_full() {
            return Ok(false);
        }
        self.apply(Event::SlotOccupancySet {
            id,
            count: slot.current_count + 1,
        });
        Ok(true)
    }

    /// Give back one unit, never going below zero.
    pub fn release(&mut self, id: Ulid) -> Result<(), EngineError> {
        let slot = self.slot(id)?;
        if slot.current_count > 0 {
            self.apply(Event::SlotOccupancySet {
                id,
                count: slot.current_count - 1,
            });
        }
        Ok(())
    }

    pub fn force_occupy(&mut self, id: Ulid) -> Result<(), EngineError> {
        let slot = self.slot(id)?;
        if slot.current_count != slot.max_capacity {
            self.apply(Event::SlotOccupancySet {
                id,
                count: slot.max_capacity,
            });
        }
        Ok(())
    }

    /// Reset occupancy to the number of rows still holding a unit
    /// (`confirmed` or `checked_in`). Returns the new count.
    pub fn recount(&mut self, id: Ulid) -> Result<u32, EngineError> {
        let slot = self.slot(id)?;
        let held = self
            .tables()
            .reservations_on(&id)
            .filter(|r| r.status.holds_unit())
            .count();
        let count = u32::try_from(held).unwrap_or(u32::MAX).min(slot.max_capacity);
        if slot.current_count != count {
            self.apply(Event::SlotOccupancySet { id, count });
        }
        Ok(count)
    }

    /// Create a slot for `block` on `court_id`/`date`. Fails if one already
    /// starts there.
    pub fn create_slot(
        &mut self,
        court_id: Ulid,
        date: NaiveDate,
        block: HourBlock,
        max_capacity: u32,
        current_count: u32,
    ) -> Result<Ulid, EngineError> {
        if self.tables().court(&court_id).is_none() {
            return Err(EngineError::CourtNotFound(court_id));
        }
        if max_capacity == 0 || current_count > max_capacity {
            return Err(EngineError::Invalid(format!(
                "occupancy {current_count} outside capacity {max_capacity}"
            )));
        }
        if let Some(existing) = self.tables().slot_at(court_id, date, block.start) {
            return Err(EngineError::Invalid(format!(
                "slot {} already exists at {date} {}",
                existing.id, block.start
            )));
        }
        let id = Ulid::new();
        self.apply(Event::SlotCreated {
            slot: TimeSlot {
                id,
                court_id,
                date,
                start_time: block.start,
                end_time: block.end,
                max_capacity,
                current_count,
                is_hot: false,
            },
        });
        Ok(id)
    }

    pub fn delete_slot(&mut self, id: Ulid) -> Result<(), EngineError> {
        self.slot(id)?;
        self.apply(Event::SlotDeleted { id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::time::hour;

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 5).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn block(h: u32) -> HourBlock {
        HourBlock {
            start: hour(h).unwrap(),
            end: hour(h + 1).unwrap(),
        }
    }

    fn court(tables: &mut Tables, venue_id: Ulid, name: &str) -> Ulid {
        let id = Ulid::new();
        tables.apply(&Event::CourtCreated {
            court: Court {
                id,
                venue_id,
                name: name.into(),
            },
        });
        id
    }

    #[test]
    fn occupancy_stays_within_bounds() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let c = court(&mut tables, Ulid::new(), "A");
        let mut txn = Txn::new(&mut tables, &cfg, now());
        let id = txn.create_slot(c, now().date(), block(9), 2, 0).unwrap();

        assert!(txn.try_occupy(id).unwrap());
        assert!(txn.try_occupy(id).unwrap());
        assert!(!txn.try_occupy(id).unwrap());
        assert_eq!(txn.slot(id).unwrap().current_count, 2);

        txn.release(id).unwrap();
        txn.release(id).unwrap();
        txn.release(id).unwrap();
        assert_eq!(txn.slot(id).unwrap().current_count, 0);

        txn.force_occupy(id).unwrap();
        assert_eq!(txn.slot(id).unwrap().current_count, 2);
    }

    #[test]
    fn recount_follows_rows_holding_a_unit() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let c = court(&mut tables, Ulid::new(), "A");
        let mut txn = Txn::new(&mut tables, &cfg, now());
        let id = txn.create_slot(c, now().date(), block(9), 3, 0).unwrap();
        txn.force_occupy(id).unwrap();

        txn.create_reservation("a", id, ReservationStatus::CheckedIn);
        txn.create_reservation("b", id, ReservationStatus::Queued);
        txn.create_reservation("c", id, ReservationStatus::Cancelled);
        assert_eq!(txn.recount(id).unwrap(), 1);
        assert_eq!(txn.slot(id).unwrap().current_count, 1);

        txn.create_reservation("d", id, ReservationStatus::Confirmed);
        assert_eq!(txn.recount(id).unwrap(), 2);
    }

    #[test]
    fn create_slot_rejects_duplicates_and_bad_occupancy() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let c = court(&mut tables, Ulid::new(), "A");
        let mut txn = Txn::new(&mut tables, &cfg, now());
        txn.create_slot(c, now().date(), block(9), 1, 0).unwrap();

        assert!(matches!(
            txn.create_slot(c, now().date(), block(9), 1, 0),
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            txn.create_slot(c, now().date(), block(10), 1, 2),
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            txn.create_slot(Ulid::new(), now().date(), block(10), 1, 0),
            Err(EngineError::CourtNotFound(_))
        ));
    }

    #[test]
    fn savepoint_discards_later_changes() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let c = court(&mut tables, Ulid::new(), "A");
        let mut txn = Txn::new(&mut tables, &cfg, now());
        let id = txn.create_slot(c, now().date(), block(9), 3, 0).unwrap();

        let sp = txn.savepoint();
        txn.try_occupy(id).unwrap();
        txn.try_occupy(id).unwrap();
        txn.rollback_to(sp);
        assert_eq!(txn.slot(id).unwrap().current_count, 0);

        let failed: Result<(), EngineError> = txn.scoped(|txn| {
            txn.try_occupy(id)?;
            Err(EngineError::AlreadyCancelled)
        });
        assert!(failed.is_err());
        assert_eq!(txn.slot(id).unwrap().current_count, 0);
    }

    #[test]
    fn find_slots_orders_by_start_then_court() {
        let mut tables = Tables::new();
        let cfg = EngineConfig::default();
        let venue = Ulid::new();
        let b = court(&mut tables, venue, "B");
        let a = court(&mut tables, venue, "A");
        let other = court(&mut tables, Ulid::new(), "A");
        let date = now().date();
        {
            let mut txn = Txn::new(&mut tables, &cfg, now());
            txn.create_slot(b, date, block(9), 1, 0).unwrap();
            txn.create_slot(a, date, block(10), 1, 0).unwrap();
            txn.create_slot(a, date, block(9), 1, 0).unwrap();
            txn.create_slot(other, date, block(9), 1, 0).unwrap();
            txn.create_slot(a, date.succ_opt().unwrap(), block(9), 1, 0).unwrap();
        }

        let got: Vec<(u32, &str)> = tables
            .find_slots(&venue, date)
            .into_iter()
            .map(|(s, c)| (chrono::Timelike::hour(&s.start_time), c.name.as_str()))
            .collect();
        assert_eq!(got, vec![(9, "A"), (9, "B"), (10, "A")]);
    }
}
