use tracing::info;
use ulid::Ulid;

use super::accounts::{check_text, check_user_fields};
use super::{Engine, EngineError, Txn};
use crate::limits::{MAX_COURTS_PER_VENUE, MAX_NAME_LEN, MAX_TEXT_LEN};
use crate::model::*;
use crate::time::has_ended;

fn check_venue(venue: &Venue) -> Result<(), EngineError> {
    check_text("venue name", &venue.name, MAX_NAME_LEN)?;
    for text in [&venue.location, &venue.description].into_iter().flatten() {
        if text.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("venue text"));
        }
    }
    Ok(())
}

/// Fields of a venue as submitted by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct VenueInput {
    pub name: String,
    pub kind: VenueKind,
    #[serde(default)]
    pub is_outdoor: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl VenueInput {
    fn into_venue(self, id: Ulid) -> Venue {
        Venue {
            id,
            name: self.name.trim().to_string(),
            kind: self.kind,
            is_outdoor: self.is_outdoor,
            location: self.location,
            description: self.description,
        }
    }
}

impl Txn<'_> {
    fn admin_cancel(&mut self, id: Ulid) -> Result<Option<Ulid>, EngineError> {
        let r = self.delete_reservation(id)?;
        let Some(slot) = self.tables().slot(&r.slot_id).cloned() else {
            return Ok(None);
        };
        if r.status.holds_unit() {
            self.release(slot.id)?;
        }
        if has_ended(slot.date, slot.end_time, self.now()) {
            return Ok(None);
        }
        self.promote_next(slot.id)
    }
}

impl Engine {
    // ── Venues & courts ──────────────────────────────────

    pub async fn list_venues(&self) -> Vec<Venue> {
        self.view(|tables, _| tables.venues().cloned().collect()).await
    }

    pub async fn add_venue(&self, input: VenueInput) -> Result<Venue, EngineError> {
        let venue = input.into_venue(Ulid::new());
        check_venue(&venue)?;
        let created = venue.clone();
        self.transact("add_venue", |txn| {
            txn.apply(Event::VenueCreated { venue });
            Ok(())
        })
        .await?;
        info!(venue = %created.id, name = %created.name, "venue added");
        Ok(created)
    }

    pub async fn update_venue(&self, id: Ulid, input: VenueInput) -> Result<Venue, EngineError> {
        let venue = input.into_venue(id);
        check_venue(&venue)?;
        let updated = venue.clone();
        self.transact("update_venue", |txn| {
            if txn.tables().venue(&id).is_none() {
                return Err(EngineError::VenueNotFound(id));
            }
            txn.apply(Event::VenueUpdated { venue });
            Ok(())
        })
        .await?;
        Ok(updated)
    }

    /// Venues with courts or schedules attached cannot be deleted.
    pub async fn delete_venue(&self, id: Ulid) -> Result<(), EngineError> {
        self.transact("delete_venue", |txn| {
            if txn.tables().venue(&id).is_none() {
                return Err(EngineError::VenueNotFound(id));
            }
            let referenced = !txn.tables().courts_of(&id).is_empty()
                || txn.tables().schedules().any(|s| s.venue_id == id);
            if referenced {
                return Err(EngineError::HasChildren(id));
            }
            txn.apply(Event::VenueDeleted { id });
            Ok(())
        })
        .await?;
        info!(venue = %id, "venue deleted");
        Ok(())
    }

    pub async fn list_courts(&self, venue_id: Ulid) -> Result<Vec<Court>, EngineError> {
        self.view(|tables, _| {
            if tables.venue(&venue_id).is_none() {
                return Err(EngineError::VenueNotFound(venue_id));
            }
            Ok(tables.courts_of(&venue_id).into_iter().cloned().collect())
        })
        .await
    }

    pub async fn add_court(&self, venue_id: Ulid, name: &str) -> Result<Court, EngineError> {
        check_text("court name", name, MAX_NAME_LEN)?;
        let court = Court {
            id: Ulid::new(),
            venue_id,
            name: name.trim().to_string(),
        };
        let created = court.clone();
        self.transact("add_court", |txn| {
            if txn.tables().venue(&venue_id).is_none() {
                return Err(EngineError::VenueNotFound(venue_id));
            }
            if txn.tables().courts_of(&venue_id).len() >= MAX_COURTS_PER_VENUE {
                return Err(EngineError::LimitExceeded("courts per venue"));
            }
            txn.apply(Event::CourtCreated { court });
            Ok(())
        })
        .await?;
        info!(court = %created.id, venue = %venue_id, "court added");
        Ok(created)
    }

    /// Deletes the court and its slots, unless any slot carries reservations.
    pub async fn delete_court(&self, id: Ulid) -> Result<usize, EngineError> {
        let removed = self
            .transact("delete_court", |txn| {
                if txn.tables().court(&id).is_none() {
                    return Err(EngineError::CourtNotFound(id));
                }
                let slots: Vec<Ulid> = txn.tables().slots().filter(|s| s.court_id == id).map(|s| s.id).collect();
                if slots.iter().any(|s| txn.tables().has_reservations(s)) {
                    return Err(EngineError::HasChildren(id));
                }
                for slot in &slots {
                    txn.delete_slot(*slot)?;
                }
                txn.apply(Event::CourtDeleted { id });
                Ok(slots.len())
            })
            .await?;
        info!(court = %id, slots = removed, "court deleted");
        Ok(removed)
    }

    // ── Users ────────────────────────────────────────────

    pub async fn list_users(&self) -> Vec<UserInfo> {
        self.view(|tables, _| tables.users().map(UserInfo::from).collect()).await
    }

    /// Apply an administrator's patch. A changed account name carries the
    /// user's reservations, schedules and credit history along; a changed
    /// score is recorded in the credit log.
    pub async fn update_user(&self, account: &str, patch: UserPatch) -> Result<UserInfo, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Invalid("nothing to update".into()));
        }
        let info = self
            .transact("update_user", |txn| {
                let current = txn.user(account)?;
                let updated = patch.apply(&current);
                check_user_fields(&updated)?;
                if updated.account != current.account && txn.tables().user(&updated.account).is_some() {
                    return Err(EngineError::AccountExists(updated.account));
                }
                let delta = updated.credit_score - current.credit_score;
                let info = UserInfo::from(&updated);
                let new_account = updated.account.clone();
                txn.apply(Event::UserUpdated {
                    account: current.account,
                    user: updated,
                });
                if delta != 0 {
                    txn.apply(Event::CreditLogged {
                        log: CreditLog {
                            user_account: new_account,
                            delta,
                            reason: CreditReason::AdminAdjustment,
                            at: txn.now(),
                        },
                    });
                }
                Ok(info)
            })
            .await?;
        info!(%account, now = %info.account, "user updated");
        Ok(info)
    }

    pub async fn delete_user(&self, account: &str) -> Result<(), EngineError> {
        self.transact("delete_user", |txn| txn.purge_user(account)).await?;
        info!(%account, "user deleted by administrator");
        Ok(())
    }

    // ── Reservations & slots ─────────────────────────────

    pub async fn list_all_reservations(&self) -> Vec<ReservationView> {
        self.view(|tables, _| {
            tables
                .all_reservations()
                .into_iter()
                .filter_map(|r| tables.reservation_view(r))
                .collect()
        })
        .await
    }

    /// Remove a reservation outright. A unit it held goes back to the slot
    /// and, while the slot is running, to the best waiter.
    pub async fn admin_cancel_reservation(&self, id: Ulid) -> Result<Option<Ulid>, EngineError> {
        let promoted = self.transact("admin_cancel_reservation", |txn| txn.admin_cancel(id)).await?;
        info!(reservation = %id, ?promoted, "reservation removed by administrator");
        Ok(promoted)
    }

    pub async fn set_slot_hot(&self, slot_id: Ulid, is_hot: bool) -> Result<(), EngineError> {
        self.transact("set_slot_hot", |txn| {
            if txn.slot(slot_id)?.is_hot != is_hot {
                txn.apply(Event::SlotHotSet { id: slot_id, is_hot });
            }
            Ok(())
        })
        .await?;
        info!(slot = %slot_id, is_hot, "slot hot flag set");
        Ok(())
    }
}
