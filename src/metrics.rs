//! Engine counters for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    /// Get the counter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the counter help text.
    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for the persistence engine.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Completed load attempts, successful or degraded.
    pub loads: Counter,
    /// Loads that failed or returned unreadable data.
    pub load_failures: Counter,
    /// Completed save attempts.
    pub saves: Counter,
    /// Saves that failed or timed out.
    pub save_failures: Counter,
    /// Auto-save sweeps executed.
    pub autosave_cycles: Counter,
    /// Operations skipped because the owner's token was held.
    pub lock_conflicts: Counter,
    /// Items moved out to durable overflow.
    pub overflow_items_out: Counter,
    /// Items merged back in from durable overflow.
    pub overflow_items_in: Counter,
    /// Legacy records rewritten in the current format.
    pub format_rewrites: Counter,
}

impl EngineMetrics {
    /// Create a fresh metrics set.
    pub fn new() -> Self {
        Self {
            loads: Counter::new("satchel_loads_total", "Completed load attempts"),
            load_failures: Counter::new(
                "satchel_load_failures_total",
                "Loads that failed or returned unreadable data",
            ),
            saves: Counter::new("satchel_saves_total", "Completed save attempts"),
            save_failures: Counter::new(
                "satchel_save_failures_total",
                "Saves that failed or timed out",
            ),
            autosave_cycles: Counter::new(
                "satchel_autosave_cycles_total",
                "Auto-save sweeps executed",
            ),
            lock_conflicts: Counter::new(
                "satchel_lock_conflicts_total",
                "Operations skipped because the owner was busy",
            ),
            overflow_items_out: Counter::new(
                "satchel_overflow_items_out_total",
                "Items moved out to durable overflow",
            ),
            overflow_items_in: Counter::new(
                "satchel_overflow_items_in_total",
                "Items merged back in from durable overflow",
            ),
            format_rewrites: Counter::new(
                "satchel_format_rewrites_total",
                "Legacy records rewritten in the current format",
            ),
        }
    }

    /// Point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loads: self.loads.get(),
            load_failures: self.load_failures.get(),
            saves: self.saves.get(),
            save_failures: self.save_failures.get(),
            autosave_cycles: self.autosave_cycles.get(),
            lock_conflicts: self.lock_conflicts.get(),
            overflow_items_out: self.overflow_items_out.get(),
            overflow_items_in: self.overflow_items_in.get(),
            format_rewrites: self.format_rewrites.get(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Completed load attempts.
    pub loads: u64,
    /// Loads that failed or returned unreadable data.
    pub load_failures: u64,
    /// Completed save attempts.
    pub saves: u64,
    /// Saves that failed or timed out.
    pub save_failures: u64,
    /// Auto-save sweeps executed.
    pub autosave_cycles: u64,
    /// Operations skipped because the owner was busy.
    pub lock_conflicts: u64,
    /// Items moved out to durable overflow.
    pub overflow_items_out: u64,
    /// Items merged back in from durable overflow.
    pub overflow_items_in: u64,
    /// Legacy records rewritten in the current format.
    pub format_rewrites: u64,
}
