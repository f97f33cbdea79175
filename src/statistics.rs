//! Per-channel ingest/analytics counters (SPEC_FULL §B "Statistics /
//! observability"), using the familiar `Counts<Count>` pattern: plain
//! atomics behind a cheap, cloneable handle, no global registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct Count(AtomicU64);

impl Count {
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One channel's ingest and analytics counters.
#[derive(Debug, Default)]
pub struct Counts {
    pub packets_received: Count,
    pub packets_dropped: Count,
    pub samples_gap_filled: Count,
    pub segments_published: Count,
    pub tone_detections: Count,
    pub discrimination_rows: Count,
    pub clock_offset_rows: Count,
    pub analytics_skipped: Count,
}

/// A cheap, cloneable handle shared between a channel's ingest and analytics
/// threads and any status reader (§5 "any status reader").
#[derive(Clone, Default)]
pub struct Statistics {
    by_channel: Arc<RwLock<AHashMap<String, Arc<Counts>>>>,
}

impl Statistics {
    pub fn channel(&self, channel_key: &str) -> Arc<Counts> {
        if let Some(counts) = self.by_channel.read().get(channel_key) {
            return counts.clone();
        }

        self.by_channel
            .write()
            .entry(channel_key.to_string())
            .or_insert_with(|| Arc::new(Counts::default()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_across_clones_of_the_same_channel() {
        let stats = Statistics::default();
        let a = stats.channel("wwv_10_mhz");
        a.packets_received.add(5);

        let b = stats.channel("wwv_10_mhz");
        assert_eq!(b.packets_received.get(), 5);

        let other = stats.channel("chu_7.85_mhz");
        assert_eq!(other.packets_received.get(), 0);
    }
}
