use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};

/// Generates merchant order numbers (`out_trade_no`) for one service instance.
///
/// An id is the local time at millisecond resolution (`YYYYMMDDhhmmssSSS`)
/// followed by a two-digit sequence taken from a process-wide counter. Ids
/// are unique only while a single instance issues fewer than 100 ids in the
/// same millisecond; multi-instance deployments need a distributed generator.
#[derive(Debug, Default)]
pub struct TradeIdGenerator {
    ops: AtomicU64,
}

impl TradeIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        self.next_at(Local::now())
    }

    fn next_at(&self, now: DateTime<Local>) -> String {
        let seq = self.ops.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % 100;
        format!("{}{seq:02}", now.format("%Y%m%d%H%M%S%3f"))
    }
}
