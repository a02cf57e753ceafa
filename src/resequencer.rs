//! Frame resequencer: decode-arrival order in, presentation order out.
//!
//! Records are kept in a [`BTreeMap`] keyed by presentation time, with the
//! decode sequence breaking ties, so the earliest record is always first.
//! Nothing leaves the buffer until it holds `window` records (or the buffer
//! is draining), which bounds the latency added by reordering to the window.
//!
//! A record that arrives with a timestamp earlier than one already emitted
//! cannot be placed in order any more. Under [`LateFramePolicy::Emit`] it is
//! flagged as a discontinuity and handed out ahead of everything else; under
//! [`LateFramePolicy::Drop`] it is released on the spot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

use crate::config::LateFramePolicy;
use crate::types::FrameRecord;

/// Position of a record in emission order.
#[derive(Debug, Clone, Copy)]
struct OrderKey {
    presentation_time: f64,
    decode_sequence: u64,
}

impl OrderKey {
    fn of<P>(record: &FrameRecord<P>) -> Self {
        Self {
            presentation_time: record.presentation_time,
            decode_sequence: record.decode_sequence,
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.presentation_time
            .total_cmp(&other.presentation_time)
            .then(self.decode_sequence.cmp(&other.decode_sequence))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

/// Where an inserted record ended up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Buffered in presentation order
    Ordered,
    /// Had no usable timestamp; buffered at the repaired time
    Repaired { presentation_time: f64 },
    /// Behind an emitted record; queued for immediate out-of-order emission
    Late { last_emitted: f64 },
    /// Behind an emitted record and released under `LateFramePolicy::Drop`
    Dropped { last_emitted: f64 },
}

/// Running counters, kept across flushes and resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResequencerStats {
    pub inserted: u64,
    pub emitted: u64,
    pub repaired: u64,
    pub late: u64,
    pub dropped: u64,
    pub discarded: u64,
}

/// Bounded ordering buffer keyed on `(presentation_time, decode_sequence)`.
pub struct FrameResequencer<P> {
    window: usize,
    frame_interval: f64,
    late_policy: LateFramePolicy,
    buffered: BTreeMap<OrderKey, FrameRecord<P>>,
    late: VecDeque<FrameRecord<P>>,
    next_sequence: u64,
    last_emitted: Option<f64>,
    draining: bool,
    stats: ResequencerStats,
}

impl<P> FrameResequencer<P> {
    /// Create a resequencer holding up to `window` records.
    ///
    /// `frame_interval` (seconds) is used to repair records without a
    /// timestamp. A zero window behaves like a window of one.
    pub fn new(window: usize, frame_interval: f64, late_policy: LateFramePolicy) -> Self {
        Self {
            window: window.max(1),
            frame_interval,
            late_policy,
            buffered: BTreeMap::new(),
            late: VecDeque::new(),
            next_sequence: 0,
            last_emitted: None,
            draining: false,
            stats: ResequencerStats::default(),
        }
    }

    /// Insert a record, stamping its decode sequence.
    pub fn insert(&mut self, mut record: FrameRecord<P>) -> Placement {
        record.decode_sequence = self.next_sequence;
        self.next_sequence += 1;
        self.stats.inserted += 1;

        if !record.presentation_time.is_finite() {
            let highest_buffered =
                self.buffered.keys().next_back().map(|key| key.presentation_time);
            let repaired = self
                .last_emitted
                .into_iter()
                .chain(highest_buffered)
                .reduce(f64::max)
                .map_or(0.0, |latest| latest + self.frame_interval);
            trace!(
                decode_sequence = record.decode_sequence,
                repaired, "repairing unknown presentation time"
            );
            record.presentation_time = repaired;
            self.stats.repaired += 1;
            self.buffered.insert(OrderKey::of(&record), record);
            return Placement::Repaired { presentation_time: repaired };
        }

        match self.last_emitted {
            Some(last_emitted) if record.presentation_time < last_emitted => {
                self.stats.late += 1;
                match self.late_policy {
                    LateFramePolicy::Emit => {
                        record.is_discontinuity = true;
                        self.late.push_back(record);
                        Placement::Late { last_emitted }
                    }
                    LateFramePolicy::Drop => {
                        self.stats.dropped += 1;
                        Placement::Dropped { last_emitted }
                    }
                }
            }
            _ => {
                trace!(
                    presentation_time = record.presentation_time,
                    decode_sequence = record.decode_sequence,
                    buffered = self.buffered.len() + 1,
                    "record buffered"
                );
                self.buffered.insert(OrderKey::of(&record), record);
                Placement::Ordered
            }
        }
    }

    /// Take the next record, if one may leave the buffer.
    ///
    /// Late records always leave first. Otherwise the earliest record leaves
    /// once occupancy reaches the window, or at any time while draining.
    pub fn try_emit(&mut self) -> Option<FrameRecord<P>> {
        if let Some(record) = self.late.pop_front() {
            self.stats.emitted += 1;
            return Some(record);
        }

        if self.buffered.len() < self.window && !self.draining {
            return None;
        }

        let (_, record) = self.buffered.pop_first()?;
        self.mark_emitted(&record);
        Some(record)
    }

    /// Emit every held record in order and leave the buffer empty.
    ///
    /// The last emitted timestamp is kept, so a record arriving afterwards
    /// with an earlier timestamp is still recognised as late.
    pub fn flush_all(&mut self) -> Vec<FrameRecord<P>> {
        let mut flushed = Vec::with_capacity(self.len());
        flushed.extend(self.late.drain(..));
        self.stats.emitted += flushed.len() as u64;

        while let Some((_, record)) = self.buffered.pop_first() {
            self.mark_emitted(&record);
            flushed.push(record);
        }

        debug!(count = flushed.len(), "resequencer flushed");
        flushed
    }

    /// Discard every held record without emitting it.
    ///
    /// Used when the buffered content belongs to a superseded stream. The
    /// payloads are dropped here. Returns how many records were discarded.
    pub fn reset(&mut self) -> usize {
        let discarded = self.len();
        self.buffered.clear();
        self.late.clear();
        self.last_emitted = None;
        self.draining = false;
        self.stats.discarded += discarded as u64;

        debug!(discarded, "resequencer reset");
        discarded
    }

    /// While draining, `try_emit` ignores the window.
    pub fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Replace the interval used to repair untimed records.
    pub fn set_frame_interval(&mut self, frame_interval: f64) {
        self.frame_interval = frame_interval;
    }

    pub fn len(&self) -> usize {
        self.buffered.len() + self.late.len()
    }

    /// Late records waiting to be handed out ahead of the ordered ones.
    pub fn late_pending(&self) -> usize {
        self.late.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty() && self.late.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Highest presentation time handed out in order so far.
    pub fn last_emitted(&self) -> Option<f64> {
        self.last_emitted
    }

    /// Presentation time of the record `try_emit` would hand out next.
    pub fn peek_earliest(&self) -> Option<f64> {
        self.late
            .front()
            .map(|record| record.presentation_time)
            .or_else(|| self.buffered.keys().next().map(|key| key.presentation_time))
    }

    pub fn stats(&self) -> ResequencerStats {
        self.stats
    }

    fn mark_emitted(&mut self, record: &FrameRecord<P>) {
        self.stats.emitted += 1;
        let pts = record.presentation_time;
        self.last_emitted = Some(self.last_emitted.map_or(pts, |last| last.max(pts)));
    }
}

impl<P> std::fmt::Debug for FrameResequencer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResequencer")
            .field("window", &self.window)
            .field("buffered", &self.buffered.len())
            .field("late", &self.late.len())
            .field("last_emitted", &self.last_emitted)
            .field("draining", &self.draining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const INTERVAL: f64 = 0.04;

    fn resequencer(window: usize) -> FrameResequencer<u32> {
        FrameResequencer::new(window, INTERVAL, LateFramePolicy::Emit)
    }

    fn record(id: u32, pts: f64) -> FrameRecord<u32> {
        FrameRecord::new(id, pts, INTERVAL)
    }

    /// Insert each timestamp, using the timestamp as payload.
    fn insert_all(rs: &mut FrameResequencer<u32>, timestamps: &[u32]) {
        for &ts in timestamps {
            rs.insert(record(ts, ts as f64));
        }
    }

    fn drain(rs: &mut FrameResequencer<u32>) -> Vec<FrameRecord<u32>> {
        std::iter::from_fn(|| rs.try_emit()).collect()
    }

    fn payloads(records: &[FrameRecord<u32>]) -> Vec<u32> {
        records.iter().map(|r| r.payload).collect()
    }

    #[test]
    fn flush_reorders_out_of_order_arrivals() {
        let mut rs = resequencer(3);
        rs.insert(record(3, 3.0));
        rs.insert(record(1, 1.0));
        assert!(rs.try_emit().is_none());
        rs.insert(record(2, 2.0));

        let flushed = rs.flush_all();
        assert_eq!(payloads(&flushed), vec![1, 2, 3]);
        assert!(rs.is_empty());
    }

    #[test]
    fn late_frame_is_flagged_and_emitted_immediately() {
        let mut rs = resequencer(3);
        insert_all(&mut rs, &[1, 2, 3]);
        let mut emitted = rs.flush_all();
        assert!(emitted.iter().all(|r| !r.is_discontinuity));

        let placement = rs.insert(record(0, 0.0));
        assert_eq!(placement, Placement::Late { last_emitted: 3.0 });

        // Below the window, but late records do not wait
        let late = rs.try_emit().expect("late record should leave immediately");
        assert!(late.is_discontinuity);
        emitted.push(late);

        assert_eq!(payloads(&emitted), vec![1, 2, 3, 0]);
        assert_eq!(rs.stats().late, 1);
    }

    #[test]
    fn late_frame_leaves_ahead_of_buffered_frames() {
        let mut rs = resequencer(2);
        insert_all(&mut rs, &[10, 11]);
        assert_eq!(rs.try_emit().map(|r| r.payload), Some(10));

        rs.insert(record(12, 12.0));
        rs.insert(record(5, 5.0));

        let order = payloads(&drain(&mut rs));
        assert_eq!(order, vec![5, 11]);
        assert_eq!(payloads(&rs.flush_all()), vec![12]);
    }

    #[test]
    fn window_plus_one_forces_earliest_out() {
        let window = 4;
        let mut rs = resequencer(window);
        for i in 0..=window as u32 {
            rs.insert(record(i, i as f64));
        }

        let first = rs.try_emit().expect("full window must emit");
        assert_eq!(first.payload, 0);
        assert_eq!(rs.last_emitted(), Some(0.0));
    }

    #[test]
    fn below_window_holds_records() {
        let mut rs = resequencer(3);
        insert_all(&mut rs, &[1, 2]);
        assert!(rs.try_emit().is_none());
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn draining_ignores_the_window() {
        let mut rs = resequencer(8);
        insert_all(&mut rs, &[4, 2, 3]);
        rs.set_draining(true);

        assert_eq!(payloads(&drain(&mut rs)), vec![2, 3, 4]);
        assert!(rs.is_draining());
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut rs = resequencer(4);
        rs.insert(record(1, 5.0));
        rs.insert(record(2, 5.0));
        rs.insert(record(3, 4.0));
        rs.insert(record(4, 5.0));

        let flushed = rs.flush_all();
        assert_eq!(payloads(&flushed), vec![3, 1, 2, 4]);
        let sequences: Vec<u64> = flushed.iter().map(|r| r.decode_sequence).collect();
        assert_eq!(sequences, vec![2, 0, 1, 3]);
    }

    #[test]
    fn unknown_timestamp_follows_last_emitted() {
        let mut rs = resequencer(1);
        rs.insert(record(1, 2.0));
        assert_eq!(rs.try_emit().map(|r| r.payload), Some(1));

        let placement = rs.insert(record(2, f64::NAN));
        match placement {
            Placement::Repaired { presentation_time } => {
                approx::assert_relative_eq!(presentation_time, 2.0 + INTERVAL)
            }
            other => panic!("expected repair, got {other:?}"),
        }

        let repaired = rs.try_emit().unwrap();
        assert!(repaired.presentation_time.is_finite());
        assert!(!repaired.is_discontinuity);
        assert_eq!(rs.stats().repaired, 1);
    }

    #[test]
    fn unknown_timestamp_follows_highest_buffered() {
        let mut rs = resequencer(4);
        rs.insert(record(1, 1.0));
        rs.insert(record(2, 3.0));

        let placement = rs.insert(record(3, f64::NAN));
        assert_eq!(placement, Placement::Repaired { presentation_time: 3.0 + INTERVAL });
        let order: Vec<u32> = rs.flush_all().into_iter().map(|r| r.payload).collect();
        assert_eq!(order, [1, 2, 3]);
    }

    #[test]
    fn unknown_timestamp_without_history_starts_at_zero() {
        let mut rs = resequencer(2);
        assert_eq!(
            rs.insert(record(1, f64::INFINITY)),
            Placement::Repaired { presentation_time: 0.0 }
        );
    }

    #[test]
    fn drop_policy_releases_late_frames() {
        let payload = Arc::new(());
        let mut rs = FrameResequencer::new(1, INTERVAL, LateFramePolicy::Drop);
        rs.insert(FrameRecord::new(Arc::clone(&payload), 5.0, INTERVAL));
        assert!(rs.try_emit().is_some());

        let placement = rs.insert(FrameRecord::new(Arc::clone(&payload), 1.0, INTERVAL));
        assert_eq!(placement, Placement::Dropped { last_emitted: 5.0 });
        assert!(rs.is_empty());
        assert_eq!(Arc::strong_count(&payload), 1);
        assert_eq!(rs.stats().dropped, 1);
    }

    #[test]
    fn reset_discards_and_releases_payloads() {
        let payload = Arc::new(());
        let mut rs = FrameResequencer::new(4, INTERVAL, LateFramePolicy::Emit);
        for i in 0..3 {
            rs.insert(FrameRecord::new(Arc::clone(&payload), i as f64, INTERVAL));
        }
        assert_eq!(Arc::strong_count(&payload), 4);

        assert_eq!(rs.reset(), 3);
        assert!(rs.is_empty());
        assert_eq!(Arc::strong_count(&payload), 1);
        assert!(rs.flush_all().is_empty());
        assert_eq!(rs.stats().discarded, 3);
    }

    #[test]
    fn reset_forgets_emission_history() {
        let mut rs = resequencer(1);
        rs.insert(record(1, 9.0));
        rs.try_emit();

        rs.reset();
        assert_eq!(rs.last_emitted(), None);
        assert_eq!(rs.insert(record(2, 0.0)), Placement::Ordered);
    }

    #[test]
    fn decode_sequence_is_never_reused() {
        let mut rs = resequencer(2);
        insert_all(&mut rs, &[1, 2]);
        rs.reset();
        insert_all(&mut rs, &[3]);

        let flushed = rs.flush_all();
        assert_eq!(flushed[0].decode_sequence, 2);
    }

    #[test]
    fn peek_reports_next_record() {
        let mut rs = resequencer(3);
        assert_eq!(rs.peek_earliest(), None);
        insert_all(&mut rs, &[7, 3, 5]);
        assert_eq!(rs.peek_earliest(), Some(3.0));
    }

    #[test]
    fn typical_ipbb_gop_comes_out_sorted() {
        // Decode order of an I P B B P B B gop with presentation indices
        let decode_order = [0, 3, 1, 2, 6, 4, 5, 9, 7, 8];
        let mut rs = resequencer(3);
        let mut out = Vec::new();
        for &pts in &decode_order {
            rs.insert(record(pts, pts as f64 * INTERVAL));
            out.extend(drain(&mut rs));
        }
        out.extend(rs.flush_all());

        assert_eq!(payloads(&out), (0..10).collect::<Vec<_>>());
        assert!(out.iter().all(|r| !r.is_discontinuity));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        fn next_random(state: u64) -> u64 {
            state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407)
        }

        fn distinct_timestamps() -> impl Strategy<Value = Vec<u32>> {
            prop::collection::btree_set(0u32..10_000, 1..64)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                .prop_shuffle()
        }

        proptest! {
          #[test]
          fn flush_emits_sorted_without_loss(timestamps in distinct_timestamps(), window in 1usize..8) {
            let mut rs = resequencer(window);
            insert_all(&mut rs, &timestamps);

            let flushed = payloads(&rs.flush_all());
            let mut expected = timestamps.clone();
            expected.sort_unstable();
            prop_assert_eq!(flushed, expected);
            prop_assert!(rs.is_empty());
          }

          #[test]
          fn every_record_is_emitted_exactly_once(timestamps in distinct_timestamps(), window in 1usize..8) {
            let mut rs = resequencer(window);
            let mut out = Vec::new();
            for &ts in &timestamps {
                rs.insert(record(ts, ts as f64));
                out.extend(drain(&mut rs));
            }
            out.extend(rs.flush_all());

            let emitted: BTreeSet<u32> = out.iter().map(|r| r.payload).collect();
            let inserted: BTreeSet<u32> = timestamps.iter().copied().collect();
            prop_assert_eq!(out.len(), timestamps.len());
            prop_assert_eq!(emitted, inserted);

            // Outside the late path, emission never goes backwards
            let in_order: Vec<f64> = out
                .iter()
                .filter(|r| !r.is_discontinuity)
                .map(|r| r.presentation_time)
                .collect();
            prop_assert!(in_order.windows(2).all(|w| w[0] < w[1]));
          }

          #[test]
          fn displacement_within_window_is_fully_sorted(
            blocks in 1usize..12,
            window in 1usize..6,
            seed in any::<u64>(),
          ) {
            // Shuffle inside consecutive blocks of `window` frames
            let total = blocks * window;
            let mut arrival: Vec<u32> = (0..total as u32).collect();
            let mut state = seed;
            for block in arrival.chunks_mut(window) {
                for i in (1..block.len()).rev() {
                    state = next_random(state);
                    block.swap(i, (state >> 33) as usize % (i + 1));
                }
            }

            let mut rs = resequencer(window);
            let mut out = Vec::new();
            for &ts in &arrival {
                rs.insert(record(ts, ts as f64));
                out.extend(drain(&mut rs));
            }
            out.extend(rs.flush_all());

            prop_assert_eq!(payloads(&out), (0..total as u32).collect::<Vec<_>>());
            prop_assert!(out.iter().all(|r| !r.is_discontinuity));
          }
        }
    }
}
