//! Output side of the host boundary
//!
//! Effects never deliver MIDI themselves; they hand events to a `MidiHost`,
//! either for immediate delivery or scheduled at a beat.

use super::events::{MidiEvent, TimedEvent};

/// Delivery primitives the host provides to the effects
pub trait MidiHost {
    /// Deliver an event at its own beat position
    fn send(&mut self, event: TimedEvent);

    /// Deliver an event at a future beat
    fn send_at_beat(&mut self, event: TimedEvent, beat: f64);

    /// Hard reset of every sounding voice
    fn all_notes_off(&mut self);
}

/// A message waiting for delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub beat: f64,
    pub message: MidiEvent,
    /// Order the host received it in; breaks ties between equal beats
    pub seq: u64,
}

/// Host output queue that releases messages in beat order
///
/// Messages keep the order they were sent in until drained, so tests can
/// inspect exactly what an effect emitted.
pub struct BeatQueue {
    pending: Vec<Scheduled>,
    /// Beat used for immediate panics
    now: f64,
    next_seq: u64,
}

impl BeatQueue {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Vec::with_capacity(capacity),
            now: 0.0,
            next_seq: 0,
        }
    }

    /// Set the beat that panics are stamped with (usually the block start)
    pub fn set_now(&mut self, beat: f64) {
        self.now = beat;
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Everything sent so far, in send order
    pub fn pending(&self) -> &[Scheduled] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move messages due before `beat` into `out`, earliest first
    pub fn drain_until(&mut self, beat: f64, out: &mut Vec<Scheduled>) -> usize {
        self.sort();
        let due = self.pending.partition_point(|s| s.beat < beat);
        out.extend(self.pending.drain(..due));
        due
    }

    /// Move every pending message into `out`, earliest first
    pub fn drain_all(&mut self, out: &mut Vec<Scheduled>) -> usize {
        self.sort();
        let count = self.pending.len();
        out.append(&mut self.pending);
        count
    }

    /// Drop pending messages without delivering them
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn sort(&mut self) {
        self.pending
            .sort_unstable_by(|a, b| a.beat.total_cmp(&b.beat).then(a.seq.cmp(&b.seq)));
    }

    fn push(&mut self, beat: f64, message: MidiEvent) {
        if self.pending.len() == self.pending.capacity() {
            log::warn!("Host queue grew past {} messages", self.pending.capacity());
        }
        self.pending.push(Scheduled {
            beat,
            message,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }
}

impl Default for BeatQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiHost for BeatQueue {
    fn send(&mut self, event: TimedEvent) {
        self.push(event.beat, event.message);
    }

    fn send_at_beat(&mut self, event: TimedEvent, beat: f64) {
        self.push(beat, event.message);
    }

    fn all_notes_off(&mut self) {
        log::debug!("All notes off at beat {:.3}", self.now);
        self.push(self.now, MidiEvent::AllNotesOff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_keeps_send_order() {
        let mut queue = BeatQueue::new();
        queue.send_at_beat(TimedEvent::note_on(60, 100, 0.0), 2.0);
        queue.send(TimedEvent::note_off(60, 1.0));

        let beats: Vec<f64> = queue.pending().iter().map(|s| s.beat).collect();
        assert_eq!(beats, [2.0, 1.0]);
    }

    #[test]
    fn test_drain_until_releases_due_messages() {
        let mut queue = BeatQueue::new();
        queue.send_at_beat(TimedEvent::note_off(60, 0.0), 3.0);
        queue.send_at_beat(TimedEvent::note_on(60, 100, 0.0), 1.0);
        queue.send_at_beat(TimedEvent::note_on(62, 100, 0.0), 1.0);
        queue.send_at_beat(TimedEvent::note_on(64, 100, 0.0), 2.0);

        let mut out = Vec::new();
        assert_eq!(queue.drain_until(2.0, &mut out), 2);
        let notes: Vec<Option<u8>> = out.iter().map(|s| s.message.note()).collect();
        // Equal beats stay in send order
        assert_eq!(notes, [Some(60), Some(62)]);
        assert_eq!(queue.len(), 2);

        out.clear();
        assert_eq!(queue.drain_all(&mut out), 2);
        assert_eq!(out[0].beat, 2.0);
        assert_eq!(out[1].beat, 3.0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_panic_uses_current_beat() {
        let mut queue = BeatQueue::new();
        queue.set_now(8.0);
        queue.all_notes_off();
        assert_eq!(queue.pending()[0].beat, 8.0);
        assert_eq!(queue.pending()[0].message, MidiEvent::AllNotesOff);
    }
}
