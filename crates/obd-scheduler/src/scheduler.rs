//! Poll Schedule Countdowns
//!
//! Holds the active [`PollTable`] and one countdown per row. Each tick every
//! row with a nonzero period in the current state counts down; a row that
//! reaches zero is due and stays due until the poller issues it.

use can_bus::BusId;
use obd_protocol::{PollEntry, PollTable};
use std::sync::Arc;

/// The active poll table and its per-row countdown state
#[derive(Debug, Clone)]
pub struct Schedule {
    table: Arc<PollTable>,
    default_bus: BusId,
    /// `None` while dormant (zero period in the current state)
    countdowns: Vec<Option<u16>>,
}

impl Schedule {
    pub fn new(table: Arc<PollTable>, default_bus: BusId) -> Self {
        let countdowns = vec![None; table.len()];
        Self {
            table,
            default_bus,
            countdowns,
        }
    }

    pub fn table(&self) -> &Arc<PollTable> {
        &self.table
    }

    pub fn default_bus(&self) -> BusId {
        self.default_bus
    }

    /// Bus a row is sent on
    pub fn bus_for(&self, entry: &PollEntry) -> BusId {
        entry.request_bus.unwrap_or(self.default_bus)
    }

    /// Count down one tick in `state`; returns the number of due rows
    pub fn advance(&mut self, state: usize) -> usize {
        let mut due = 0;
        for (entry, countdown) in self.table.iter().zip(self.countdowns.iter_mut()) {
            let period = entry.period(state);
            if period == 0 {
                *countdown = None;
                continue;
            }
            let armed = countdown.map_or(period, |remaining| remaining.min(period));
            let remaining = armed.saturating_sub(1);
            *countdown = Some(remaining);
            if remaining == 0 {
                due += 1;
            }
        }
        due
    }

    /// Due rows in table order
    pub fn due(&self) -> impl Iterator<Item = (usize, &PollEntry)> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(|(index, _)| self.countdowns[*index] == Some(0))
    }

    /// Restart a row's countdown after it was issued
    pub fn mark_issued(&mut self, index: usize, state: usize) {
        if let (Some(entry), Some(countdown)) =
            (self.table.entries().get(index), self.countdowns.get_mut(index))
        {
            let period = entry.period(state);
            *countdown = if period == 0 { None } else { Some(period) };
        }
    }

    /// First row whose replies arrive on `id` on `bus`
    pub fn reply_entry(&self, bus: BusId, id: u32) -> Option<&PollEntry> {
        self.table
            .iter()
            .find(|entry| self.bus_for(entry) == bus && entry.accepts(id))
    }

    /// Check if `id` on `bus` is a response ID of any row
    pub fn is_reply_id(&self, bus: BusId, id: u32) -> bool {
        self.reply_entry(bus, id).is_some()
    }

    /// Countdown of a row; `None` while dormant
    pub fn countdown(&self, index: usize) -> Option<u16> {
        self.countdowns.get(index).copied().flatten()
    }
}
