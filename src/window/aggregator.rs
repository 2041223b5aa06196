use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use super::{window_start, GroupBy, GroupKey, WindowAggregate, WindowKey};
use crate::event::RawEvent;

/// Result of feeding one event into the aggregator.
#[derive(Debug, Default)]
pub struct Observation {
    /// Windows closed by the watermark advance this event caused.
    pub closed: Vec<WindowAggregate>,
    /// False when the event fell into an already closed window and was dropped.
    pub accepted: bool,
}

/// Tumbling-window state machine.
///
/// All open windows share one start time, the watermark. An event from a later
/// bucket advances the watermark and closes every open window first; an event
/// from an earlier bucket is late and is dropped.
pub struct WindowAggregator {
    duration_ms: i64,
    group_by: GroupBy,
    watermark_ms: Option<i64>,
    open: BTreeMap<GroupKey, WindowAggregate>,
}

impl WindowAggregator {
    pub fn new(duration: Duration, group_by: GroupBy) -> Self {
        let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            duration_ms,
            group_by,
            watermark_ms: None,
            open: BTreeMap::new(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Earliest window start still accepting events.
    pub fn watermark_ms(&self) -> Option<i64> {
        self.watermark_ms
    }

    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    pub fn observe(&mut self, event: &RawEvent) -> Observation {
        let start = window_start(event.event_time_ms(), self.duration_ms);

        let mut closed = Vec::new();
        match self.watermark_ms {
            Some(current) if start < current => {
                debug!(
                    event_ts = %event.timestamp,
                    watermark_ms = current,
                    "late event dropped"
                );
                return Observation {
                    closed,
                    accepted: false,
                };
            }
            Some(current) if start > current => closed = self.advance_watermark(start),
            None => self.watermark_ms = Some(start),
            _ => {}
        }

        let group = GroupKey::for_event(self.group_by, event);
        match self.open.get_mut(&group) {
            Some(agg) => agg.absorb(event),
            None => {
                let key = WindowKey::containing(event.event_time_ms(), self.duration_ms, group.clone());
                self.open.insert(group, WindowAggregate::open(key, event));
            }
        }

        Observation {
            closed,
            accepted: true,
        }
    }

    /// Move the watermark to `start_ms` and close every window that began before it.
    pub fn advance_watermark(&mut self, start_ms: i64) -> Vec<WindowAggregate> {
        if self.watermark_ms.is_some_and(|current| start_ms <= current) {
            return Vec::new();
        }
        self.watermark_ms = Some(start_ms);
        self.drain()
    }

    /// Close everything still open (end of input, idle timeout, shutdown).
    ///
    /// The flushed bucket stays closed: later events for it count as late.
    pub fn flush(&mut self) -> Vec<WindowAggregate> {
        let closed = self.drain();
        if !closed.is_empty() {
            self.watermark_ms = self
                .watermark_ms
                .map(|current| current.saturating_add(self.duration_ms));
        }
        closed
    }

    fn drain(&mut self) -> Vec<WindowAggregate> {
        std::mem::take(&mut self.open).into_values().collect()
    }
}
