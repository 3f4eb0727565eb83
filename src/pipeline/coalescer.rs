//! Stream coalescer (per-segment debounce and force-commit)
//!
//! Decides when an evolving transcript fragment has settled enough to be
//! shown. Every mutating call takes `now_ms` so the logic is fully
//! deterministic; the orchestrator's tick supplies real time.

use crate::config::CoalescerConfig;
use crate::domain::models::CoalescedSegment;
use std::collections::HashMap;

/// One revision of a segment's visible state
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentUpdate {
    pub text: String,
    pub translation: Option<String>,
    pub confidence: f32,
    pub is_final: bool,
}

impl SegmentUpdate {
    fn tuple(&self) -> (String, Option<String>, bool) {
        (self.text.clone(), self.translation.clone(), self.is_final)
    }
}

/// Aggregated coalescer metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoalescerStats {
    pub total_segments: usize,
    pub emitted_count: u64,
    pub suppressed_count: u64,
    pub duplicate_suppressions: u64,
    pub avg_hold_ms: f64,
}

#[derive(Debug)]
struct PendingUpdate {
    update: SegmentUpdate,
    /// Arrival of the first unemitted update
    first_pending_at: i64,
    /// Arrival of the most recent update (debounce anchor)
    last_update_at: i64,
}

/// Debounce/force-commit controller for a single segment key
#[derive(Debug)]
pub struct StreamCoalescer {
    key: String,
    debounce_ms: i64,
    force_commit_ms: i64,
    last_emitted: Option<(String, Option<String>, bool)>,
    pending: Option<PendingUpdate>,
    last_activity_at: i64,
    emitted_count: u64,
    suppressed_count: u64,
    duplicate_suppressions: u64,
    total_hold_ms: i64,
}

impl StreamCoalescer {
    pub fn new(key: impl Into<String>, debounce_ms: i64, force_commit_ms: i64, now_ms: i64) -> Self {
        Self {
            key: key.into(),
            debounce_ms,
            force_commit_ms,
            last_emitted: None,
            pending: None,
            last_activity_at: now_ms,
            emitted_count: 0,
            suppressed_count: 0,
            duplicate_suppressions: 0,
            total_hold_ms: 0,
        }
    }

    /// Feed one revision. Returns an emission when the update is final and
    /// changes the visible state; otherwise the revision is held for the
    /// debounce window.
    pub fn update(&mut self, update: SegmentUpdate, now_ms: i64) -> Option<CoalescedSegment> {
        self.last_activity_at = now_ms;

        if self.last_emitted.as_ref() == Some(&update.tuple()) {
            self.duplicate_suppressions += 1;
            self.pending = None;
            return None;
        }

        let finality_flip = update.is_final
            && self
                .last_emitted
                .as_ref()
                .map(|(_, _, was_final)| !was_final)
                .unwrap_or(true);

        if finality_flip {
            let first_pending_at = self
                .pending
                .take()
                .map(|p| p.first_pending_at)
                .unwrap_or(now_ms);
            return Some(self.emit(update, first_pending_at, now_ms));
        }

        match self.pending.as_mut() {
            Some(pending) => {
                self.suppressed_count += 1;
                pending.update = update;
                pending.last_update_at = now_ms;
            }
            None => {
                self.pending = Some(PendingUpdate {
                    update,
                    first_pending_at: now_ms,
                    last_update_at: now_ms,
                });
            }
        }
        None
    }

    /// Emit if the debounce window elapsed or the force-commit bound was hit
    pub fn poll(&mut self, now_ms: i64) -> Option<CoalescedSegment> {
        let due = match self.pending.as_ref() {
            Some(pending) => {
                now_ms - pending.last_update_at >= self.debounce_ms
                    || now_ms - pending.first_pending_at >= self.force_commit_ms
            }
            None => false,
        };
        if !due {
            return None;
        }
        let pending = self.pending.take().expect("pending checked above");
        Some(self.emit(pending.update, pending.first_pending_at, now_ms))
    }

    /// Emit whatever is held, regardless of timers
    pub fn force_flush(&mut self, now_ms: i64) -> Option<CoalescedSegment> {
        let pending = self.pending.take()?;
        Some(self.emit(pending.update, pending.first_pending_at, now_ms))
    }

    pub fn is_idle_since(&self, now_ms: i64, max_inactive_ms: i64) -> bool {
        self.pending.is_none() && now_ms - self.last_activity_at >= max_inactive_ms
    }

    fn emit(
        &mut self,
        update: SegmentUpdate,
        first_pending_at: i64,
        now_ms: i64,
    ) -> CoalescedSegment {
        let hold = (now_ms - first_pending_at).max(0);
        self.emitted_count += 1;
        self.total_hold_ms += hold;
        self.last_emitted = Some(update.tuple());
        CoalescedSegment {
            segment_key: self.key.clone(),
            text: update.text,
            translation: update.translation,
            is_final: update.is_final,
            hold_duration_ms: hold,
            settled_at: now_ms,
        }
    }
}

/// Arena of per-key coalescers with an eviction policy
pub struct SegmentManager {
    config: CoalescerConfig,
    coalescers: HashMap<String, StreamCoalescer>,
    /// Counters folded in from evicted coalescers
    retired: CoalescerStats,
    retired_hold_ms: i64,
}

impl SegmentManager {
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            config,
            coalescers: HashMap::new(),
            retired: CoalescerStats::default(),
            retired_hold_ms: 0,
        }
    }

    pub fn update(
        &mut self,
        key: &str,
        update: SegmentUpdate,
        now_ms: i64,
    ) -> Option<CoalescedSegment> {
        let debounce = self.config.debounce_ms as i64;
        let force_commit = self.config.force_commit_ms as i64;
        let coalescer = self
            .coalescers
            .entry(key.to_string())
            .or_insert_with(|| StreamCoalescer::new(key, debounce, force_commit, now_ms));
        coalescer.update(update, now_ms)
    }

    /// Drive timers for every live coalescer
    pub fn poll(&mut self, now_ms: i64) -> Vec<CoalescedSegment> {
        let mut emissions: Vec<CoalescedSegment> = self
            .coalescers
            .values_mut()
            .filter_map(|c| c.poll(now_ms))
            .collect();
        emissions.sort_by(|a, b| a.settled_at.cmp(&b.settled_at));
        emissions
    }

    /// Emit everything held, for session stop
    pub fn force_flush(&mut self, now_ms: i64) -> Vec<CoalescedSegment> {
        self.coalescers
            .values_mut()
            .filter_map(|c| c.force_flush(now_ms))
            .collect()
    }

    /// Drop coalescers idle past `max_inactive_ms`
    pub fn evict_inactive(&mut self, now_ms: i64) {
        let max_inactive = self.config.max_inactive_ms as i64;
        let idle_keys: Vec<String> = self
            .coalescers
            .iter()
            .filter(|(_, c)| c.is_idle_since(now_ms, max_inactive))
            .map(|(k, _)| k.clone())
            .collect();
        for key in idle_keys {
            if let Some(coalescer) = self.coalescers.remove(&key) {
                log::debug!("Evicting inactive coalescer for segment {}", key);
                self.retire(&coalescer);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.coalescers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coalescers.is_empty()
    }

    pub fn stats(&self) -> CoalescerStats {
        let mut stats = self.retired.clone();
        let mut total_hold = self.retired_hold_ms;
        for coalescer in self.coalescers.values() {
            stats.total_segments += 1;
            stats.emitted_count += coalescer.emitted_count;
            stats.suppressed_count += coalescer.suppressed_count;
            stats.duplicate_suppressions += coalescer.duplicate_suppressions;
            total_hold += coalescer.total_hold_ms;
        }
        stats.avg_hold_ms = if stats.emitted_count > 0 {
            total_hold as f64 / stats.emitted_count as f64
        } else {
            0.0
        };
        stats
    }

    fn retire(&mut self, coalescer: &StreamCoalescer) {
        self.retired.total_segments += 1;
        self.retired.emitted_count += coalescer.emitted_count;
        self.retired.suppressed_count += coalescer.suppressed_count;
        self.retired.duplicate_suppressions += coalescer.duplicate_suppressions;
        self.retired_hold_ms += coalescer.total_hold_ms;
    }
}
