use std::time::{Duration, Instant};

use super::update::ProgressUpdate;

/// Rate-limits progress updates.
///
/// Identical updates are dropped. Otherwise at most one update per interval
/// is emitted, except that an update bypasses the interval when it adds a
/// terminal task, changes the status line, adds events, or changes result
/// text. A held-back update is kept as pending for [`Self::flush`].
#[derive(Debug)]
pub struct UpdateThrottle {
    interval: Duration,
    last: Option<(Instant, ProgressUpdate)>,
    pending: Option<ProgressUpdate>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            pending: None,
        }
    }

    /// Offer an update; returns it if it should be emitted now.
    pub fn offer(&mut self, update: ProgressUpdate, now: Instant) -> Option<ProgressUpdate> {
        let Some((at, last)) = &self.last else {
            return Some(self.emit(update, now));
        };
        if *last == update {
            self.pending = None;
            return None;
        }
        if bypasses_interval(last, &update) || now.duration_since(*at) >= self.interval {
            return Some(self.emit(update, now));
        }
        self.pending = Some(update);
        None
    }

    /// The held-back update, if any.
    pub fn flush(&mut self) -> Option<ProgressUpdate> {
        let update = self.pending.take()?;
        Some(self.emit(update, Instant::now()))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn emit(&mut self, update: ProgressUpdate, now: Instant) -> ProgressUpdate {
        self.pending = None;
        self.last = Some((now, update.clone()));
        update
    }
}

fn bypasses_interval(last: &ProgressUpdate, next: &ProgressUpdate) -> bool {
    next.terminal_ids.iter().any(|id| !last.terminal_ids.contains(id))
        || next.status_line != last.status_line
        || next.event_count > last.event_count
        || next.result_fingerprint != last.result_fingerprint
}
