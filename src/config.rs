use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, Timelike, Weekday};

use crate::model::{TimeSlot, VenueKind};

/// Weekend-evening slots with spare capacity queue overflow instead of
/// rejecting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialHotPolicy {
    pub days: Vec<Weekday>,
    /// Start hours (inclusive..exclusive) that qualify.
    pub start_hours: Range<u32>,
    /// Slots must hold strictly more than this many people.
    pub min_capacity_exclusive: u32,
}

impl Default for SpecialHotPolicy {
    fn default() -> Self {
        Self {
            days: vec![Weekday::Sat, Weekday::Sun],
            start_hours: 19..21,
            min_capacity_exclusive: 1,
        }
    }
}

impl SpecialHotPolicy {
    pub fn applies(&self, slot: &TimeSlot) -> bool {
        self.days.contains(&slot.date.weekday())
            && self.start_hours.contains(&slot.start_time.hour())
            && slot.max_capacity > self.min_capacity_exclusive
    }
}

/// Everything the engine needs to know about its environment. Built once and
/// handed to [`crate::engine::Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the WAL.
    pub data_dir: PathBuf,
    /// First bookable hour of the day (slot start).
    pub open_hour: u32,
    /// Hour the last slot ends.
    pub close_hour: u32,
    /// Length of the public booking window in days, today included.
    pub window_days: u32,
    /// Booking is suspended at or below this score.
    pub suspend_at_or_below: i32,
    /// Hot slots need a score strictly above this.
    pub hot_slot_credit_floor: i32,
    pub initial_credit: i32,
    pub no_show_penalty: i32,
    /// Days since the last deduction before a suspended score is restored.
    pub restore_after_days: i64,
    pub restored_credit: i32,
    /// How far ahead a schedule lock is materialized.
    pub schedule_horizon_months: u32,
    /// Capacity of generated slots for gyms and pools.
    pub large_venue_capacity: u32,
    /// Capacity of generated slots for everything else.
    pub default_capacity: u32,
    pub special_hot: SpecialHotPolicy,
    /// Days a user's board post stays visible.
    pub post_lifetime_days: u64,
    pub maintenance_interval: Duration,
    /// WAL appends before the compactor rewrites it.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            open_hour: 9,
            close_hour: 22,
            window_days: 3,
            suspend_at_or_below: 60,
            hot_slot_credit_floor: 80,
            initial_credit: 100,
            no_show_penalty: 10,
            restore_after_days: 7,
            restored_credit: 100,
            schedule_horizon_months: 4,
            large_venue_capacity: 100,
            default_capacity: 1,
            special_hot: SpecialHotPolicy::default(),
            post_lifetime_days: 365,
            maintenance_interval: Duration::from_secs(3600),
            compact_threshold: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl EngineConfig {
    /// Defaults overridden by `SLOTBOOK_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = std::env::var("SLOTBOOK_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(h) = env_parse("SLOTBOOK_OPEN_HOUR") {
            cfg.open_hour = h;
        }
        if let Some(h) = env_parse("SLOTBOOK_CLOSE_HOUR") {
            cfg.close_hour = h;
        }
        if let Some(d) = env_parse("SLOTBOOK_WINDOW_DAYS") {
            cfg.window_days = d;
        }
        if let Some(v) = env_parse("SLOTBOOK_SUSPEND_AT_OR_BELOW") {
            cfg.suspend_at_or_below = v;
        }
        if let Some(v) = env_parse("SLOTBOOK_HOT_SLOT_CREDIT_FLOOR") {
            cfg.hot_slot_credit_floor = v;
        }
        if let Some(v) = env_parse("SLOTBOOK_NO_SHOW_PENALTY") {
            cfg.no_show_penalty = v;
        }
        if let Some(v) = env_parse("SLOTBOOK_RESTORE_AFTER_DAYS") {
            cfg.restore_after_days = v;
        }
        if let Some(v) = env_parse("SLOTBOOK_SCHEDULE_HORIZON_MONTHS") {
            cfg.schedule_horizon_months = v;
        }
        if let Some(v) = env_parse("SLOTBOOK_POST_LIFETIME_DAYS") {
            cfg.post_lifetime_days = v;
        }
        if let Some(secs) = env_parse::<u64>("SLOTBOOK_MAINTENANCE_INTERVAL_SECS") {
            cfg.maintenance_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(v) = env_parse("SLOTBOOK_COMPACT_THRESHOLD") {
            cfg.compact_threshold = v;
        }
        cfg
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }

    /// Capacity given to slots the maintenance job generates for `kind`.
    pub fn capacity_for(&self, kind: VenueKind) -> u32 {
        if kind.is_large_capacity() {
            self.large_venue_capacity
        } else {
            self.default_capacity
        }
    }

    /// Start hours of generated slots.
    pub fn operating_hours(&self) -> Range<u32> {
        self.open_hour..self.close_hour.min(24)
    }
}
