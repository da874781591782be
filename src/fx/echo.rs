//! Echo effects
//!
//! Both effects answer a released note with a chain of echoes scheduled
//! ahead of time. `EchoAccelerator` makes the echoes speed up or slow down
//! geometrically; `RandomEcho` scatters them with random gaps and
//! velocities.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{MidiEffect, StopLatch};
use crate::midi::duration::LengthSelector;
use crate::midi::events::{MidiEvent, TimedEvent};
use crate::midi::host::MidiHost;
use crate::midi::tracker::{ActiveNote, NoteStateTracker};
use crate::transport::TransportInfo;

/// Longest echo allowed while echoes are slowing down (beats)
pub const MAX_DELAY: f64 = 8.0;
/// Shortest echo allowed while echoes are speeding up (beats)
pub const MIN_DELAY: f64 = 1.0 / 240.0;
/// Random echo length and gap bounds (beats)
pub const RANDOM_MIN_DELAY: f64 = 15.0 / 240.0;
pub const RANDOM_MAX_DELAY: f64 = 1.5;
/// Random echo velocities
pub const RANDOM_VELOCITY: Range<u8> = 40..80;

pub const MAX_REPEATS: u32 = 30;

fn send_echo(origin: &ActiveNote, velocity: u8, start: f64, length: f64, host: &mut dyn MidiHost) {
    let on = MidiEvent::note_on(origin.note, velocity, origin.channel);
    let off = MidiEvent::note_off(origin.note, origin.channel);
    host.send_at_beat(TimedEvent::new(on, start), start);
    host.send_at_beat(TimedEvent::new(off, start + length), start + length);
}

// =============================================================================
// ACCELERATING ECHO
// =============================================================================

/// Echo accelerator parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoSettings {
    /// Length of the first echo; "off" follows the held note's duration
    pub start_length: LengthSelector,
    /// Echoes per released note (1-30)
    pub repeats: u32,
    /// Percent change of each echo's length over the previous one (-50..50)
    pub delay_accel: f64,
    /// Percent change of each echo's velocity over the previous one (-50..50)
    pub velocity_accel: f64,
}

impl Default for EchoSettings {
    fn default() -> Self {
        Self {
            start_length: LengthSelector::Off,
            repeats: 10,
            delay_accel: 0.0,
            velocity_accel: 0.0,
        }
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(-50.0, 50.0)
    } else {
        0.0
    }
}

impl EchoSettings {
    /// Clamp every field into its valid range
    pub fn sanitized(self) -> Self {
        Self {
            start_length: self.start_length,
            repeats: self.repeats.clamp(1, MAX_REPEATS),
            delay_accel: clamp_rate(self.delay_accel),
            velocity_accel: clamp_rate(self.velocity_accel),
        }
    }
}

pub struct EchoAccelerator {
    settings: EchoSettings,
    latch: StopLatch,
}

impl EchoAccelerator {
    pub fn new(settings: EchoSettings) -> Self {
        Self {
            settings: settings.sanitized(),
            latch: StopLatch::new(),
        }
    }

    pub fn settings(&self) -> &EchoSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: EchoSettings) {
        self.settings = settings.sanitized();
    }

    /// Schedule the echo chain for one released note
    ///
    /// The first echo starts at `start` and lasts `base` beats. Each echo is
    /// followed by a rest as long as itself, then the length and velocity
    /// scale by their rates. The chain stops early once a slowing echo grows
    /// past `MAX_DELAY` or a speeding echo shrinks under `MIN_DELAY`.
    /// Returns the number of echoes scheduled.
    pub fn schedule_echoes(
        &self,
        origin: &ActiveNote,
        start: f64,
        base: f64,
        host: &mut dyn MidiHost,
    ) -> u32 {
        let accel = self.settings.delay_accel;
        let delay_scale = 1.0 + accel / 100.0;
        let velocity_scale = 1.0 + self.settings.velocity_accel / 100.0;

        let mut start = start;
        let mut delay = base;
        let mut velocity = origin.velocity as f64;

        for repeat in 0..self.settings.repeats {
            if (accel > 0.0 && delay > MAX_DELAY) || (accel < 0.0 && delay < MIN_DELAY) {
                log::debug!(
                    "Echo chain for note {} stopped after {} repeats (delay {:.4})",
                    origin.note,
                    repeat,
                    delay
                );
                return repeat;
            }

            velocity = velocity.clamp(1.0, 127.0);
            send_echo(origin, velocity.round() as u8, start, delay, host);

            start += delay + delay.abs();
            delay *= delay_scale;
            velocity *= velocity_scale;
        }
        self.settings.repeats
    }
}

impl MidiEffect for EchoAccelerator {
    fn handle_midi(&mut self, event: &TimedEvent, origin: Option<ActiveNote>, host: &mut dyn MidiHost) {
        if let (MidiEvent::NoteOff { .. }, Some(origin)) = (event.message, origin) {
            let base = match self.settings.start_length.to_beats() {
                Some(length) => length,
                None => event.duration.unwrap_or(0.0),
            };

            if base > 0.0 && base.is_finite() {
                self.schedule_echoes(&origin, event.beat + base, base, host);
            } else {
                log::trace!("Note {} has no positive length, no echoes", origin.note);
            }
        }
        host.send(*event);
    }

    fn process_block(
        &mut self,
        transport: &TransportInfo,
        notes: &mut NoteStateTracker,
        host: &mut dyn MidiHost,
    ) {
        self.latch.update(transport, notes, host);
    }
}

// =============================================================================
// RANDOM ECHO
// =============================================================================

/// Random echo parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomEchoSettings {
    /// Echoes per released note (1-30)
    pub repeats: u32,
    /// Fixed seed for reproducible output; entropy when absent
    pub seed: Option<u64>,
}

impl Default for RandomEchoSettings {
    fn default() -> Self {
        Self {
            repeats: 10,
            seed: None,
        }
    }
}

impl RandomEchoSettings {
    pub fn sanitized(self) -> Self {
        Self {
            repeats: self.repeats.clamp(1, MAX_REPEATS),
            seed: self.seed,
        }
    }
}

pub struct RandomEcho {
    settings: RandomEchoSettings,
    rng: StdRng,
    latch: StopLatch,
}

impl RandomEcho {
    pub fn new(settings: RandomEchoSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            settings,
            rng: Self::make_rng(settings.seed),
            latch: StopLatch::new(),
        }
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn settings(&self) -> &RandomEchoSettings {
        &self.settings
    }

    /// Replace the settings; the generator restarts only when the seed changes
    pub fn set_settings(&mut self, settings: RandomEchoSettings) {
        let settings = settings.sanitized();
        if settings.seed != self.settings.seed {
            self.rng = Self::make_rng(settings.seed);
        }
        self.settings = settings;
    }

    /// Schedule random echoes starting at `start`
    pub fn schedule_echoes(&mut self, origin: &ActiveNote, start: f64, host: &mut dyn MidiHost) {
        let mut start = start;
        for _ in 0..self.settings.repeats {
            let length = self.rng.gen_range(RANDOM_MIN_DELAY..=RANDOM_MAX_DELAY);
            let velocity = self.rng.gen_range(RANDOM_VELOCITY);
            send_echo(origin, velocity, start, length, host);

            let gap = self.rng.gen_range(RANDOM_MIN_DELAY..=RANDOM_MAX_DELAY);
            start += length + gap;
        }
    }
}

impl MidiEffect for RandomEcho {
    fn handle_midi(&mut self, event: &TimedEvent, origin: Option<ActiveNote>, host: &mut dyn MidiHost) {
        if let (MidiEvent::NoteOff { .. }, Some(origin)) = (event.message, origin) {
            self.schedule_echoes(&origin, event.beat, host);
        }
        host.send(*event);
    }

    fn process_block(
        &mut self,
        transport: &TransportInfo,
        notes: &mut NoteStateTracker,
        host: &mut dyn MidiHost,
    ) {
        self.latch.update(transport, notes, host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::host::{BeatQueue, Scheduled};

    fn origin(velocity: u8) -> ActiveNote {
        ActiveNote {
            note: 60,
            velocity,
            channel: 0,
            beat: 0.0,
        }
    }

    fn echo(start_length: &str, delay_accel: f64, velocity_accel: f64) -> EchoAccelerator {
        EchoAccelerator::new(EchoSettings {
            start_length: start_length.parse().unwrap(),
            repeats: 10,
            delay_accel,
            velocity_accel,
        })
    }

    /// (start, length, velocity) of each echo in send order
    fn echoes(pending: &[Scheduled]) -> Vec<(f64, f64, u8)> {
        pending
            .chunks(2)
            .filter_map(|pair| match (pair[0].message, pair.get(1).map(|s| s.message)) {
                (MidiEvent::NoteOn { velocity, .. }, Some(MidiEvent::NoteOff { .. })) => {
                    Some((pair[0].beat, pair[1].beat - pair[0].beat, velocity))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_constant_echoes() {
        let fx = echo("1/4", 0.0, 0.0);
        let mut queue = BeatQueue::new();

        assert_eq!(fx.schedule_echoes(&origin(100), 2.0, 1.0, &mut queue), 10);
        let chain = echoes(queue.pending());
        assert_eq!(chain.len(), 10);
        assert_eq!(chain[0], (2.0, 1.0, 100));
        assert_eq!(chain[1], (4.0, 1.0, 100));
        assert_eq!(chain[9].0, 20.0);
    }

    #[test]
    fn test_slowing_chain_stops_past_max_delay() {
        let fx = echo("1/4", 50.0, 0.0);
        let mut queue = BeatQueue::new();

        // 1, 1.5, 2.25, 3.375, 5.06, 7.59, then 11.39 is over the limit
        assert_eq!(fx.schedule_echoes(&origin(100), 0.0, 1.0, &mut queue), 6);
        let chain = echoes(queue.pending());
        assert_eq!(chain.len(), 6);
        for pair in chain.windows(2) {
            assert!(pair[1].1 > pair[0].1);
            // Gap between echoes equals the previous echo's length
            assert!((pair[1].0 - (pair[0].0 + 2.0 * pair[0].1)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_speeding_chain_stops_under_min_delay() {
        let fx = echo("1/32", -50.0, 0.0);
        let mut queue = BeatQueue::new();

        // 0.125 halves to 0.0039 on the sixth echo, under 1/240
        assert_eq!(fx.schedule_echoes(&origin(100), 0.0, 0.125, &mut queue), 5);
    }

    #[test]
    fn test_velocity_decays_but_stays_audible() {
        let fx = echo("1/16", 0.0, -50.0);
        let mut queue = BeatQueue::new();
        fx.schedule_echoes(&origin(100), 0.0, 0.25, &mut queue);

        let velocities: Vec<u8> = echoes(queue.pending()).iter().map(|e| e.2).collect();
        assert_eq!(&velocities[..3], &[100, 50, 25]);
        assert!(velocities.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(velocities.last(), Some(&1));
    }

    #[test]
    fn test_velocity_growth_is_clamped() {
        let fx = echo("1/16", 0.0, 50.0);
        let mut queue = BeatQueue::new();
        fx.schedule_echoes(&origin(100), 0.0, 0.25, &mut queue);
        assert!(echoes(queue.pending()).iter().skip(1).all(|e| e.2 == 127));
    }

    #[test]
    fn test_release_triggers_chain_then_forwards() {
        let mut fx = echo("1/8", 0.0, 0.0);
        let mut notes = NoteStateTracker::new();
        let mut queue = BeatQueue::new();

        let mut on = TimedEvent::note_on(60, 90, 0.0);
        let origin = notes.observe(&mut on);
        fx.handle_midi(&on, origin, &mut queue);
        assert_eq!(queue.len(), 1);

        let mut off = TimedEvent::note_off(60, 1.0);
        let origin = notes.observe(&mut off);
        fx.handle_midi(&off, origin, &mut queue);

        let pending = queue.pending();
        assert_eq!(pending.len(), 1 + 20 + 1);
        // First echo half a beat after release
        assert_eq!(pending[1].beat, 1.5);
        assert_eq!(pending.last().map(|s| s.message), Some(off.message));
    }

    #[test]
    fn test_follow_mode_uses_held_duration() {
        let mut fx = echo("off", 0.0, 0.0);
        let mut notes = NoteStateTracker::new();
        let mut queue = BeatQueue::new();

        notes.observe(&mut TimedEvent::note_on(60, 90, 1.0));
        let mut off = TimedEvent::note_off(60, 1.75);
        let origin = notes.observe(&mut off);
        fx.handle_midi(&off, origin, &mut queue);

        let chain = echoes(queue.pending());
        assert_eq!(chain[0], (2.5, 0.75, 90));
    }

    #[test]
    fn test_follow_mode_skips_release_before_start() {
        let mut fx = echo("off", 0.0, 0.0);
        let mut notes = NoteStateTracker::new();
        let mut queue = BeatQueue::new();

        // Released after a jump back past the note's start
        notes.observe(&mut TimedEvent::note_on(60, 90, 3.0));
        let mut off = TimedEvent::note_off(60, 1.0);
        let origin = notes.observe(&mut off);
        assert_eq!(off.duration, Some(-2.0));

        fx.handle_midi(&off, origin, &mut queue);
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.pending()[0].message, MidiEvent::NoteOff { note: 60, .. }));
    }

    #[test]
    fn test_unmatched_release_only_forwards() {
        let mut fx = echo("1/4", 0.0, 0.0);
        let mut queue = BeatQueue::new();
        fx.handle_midi(&TimedEvent::note_off(60, 1.0), None, &mut queue);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_stop_sends_single_panic() {
        let mut fx = echo("1/4", 0.0, 0.0);
        let mut notes = NoteStateTracker::new();
        let mut queue = BeatQueue::new();

        fx.process_block(&TransportInfo::playing(0.0, 1.0), &mut notes, &mut queue);
        fx.process_block(&TransportInfo::stopped(1.0), &mut notes, &mut queue);
        fx.process_block(&TransportInfo::stopped(1.0), &mut notes, &mut queue);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].message, MidiEvent::AllNotesOff);
    }

    #[test]
    fn test_settings_are_clamped() {
        let settings = EchoSettings {
            repeats: 99,
            delay_accel: -80.0,
            velocity_accel: f64::NAN,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(settings.repeats, MAX_REPEATS);
        assert_eq!(settings.delay_accel, -50.0);
        assert_eq!(settings.velocity_accel, 0.0);
    }

    #[test]
    fn test_random_echoes_stay_in_bounds() {
        let mut fx = RandomEcho::new(RandomEchoSettings {
            repeats: 30,
            seed: Some(7),
        });
        let mut queue = BeatQueue::new();
        fx.schedule_echoes(&origin(100), 4.0, &mut queue);

        let chain = echoes(queue.pending());
        assert_eq!(chain.len(), 30);
        assert_eq!(chain[0].0, 4.0);
        for (_, length, velocity) in &chain {
            assert!((RANDOM_MIN_DELAY..=RANDOM_MAX_DELAY).contains(length));
            assert!(RANDOM_VELOCITY.contains(velocity));
        }
        for pair in chain.windows(2) {
            let gap = pair[1].0 - (pair[0].0 + pair[0].1);
            assert!(gap >= RANDOM_MIN_DELAY - 1e-9 && gap <= RANDOM_MAX_DELAY + 1e-9);
        }
    }

    #[test]
    fn test_random_seed_is_reproducible() {
        let settings = RandomEchoSettings {
            repeats: 5,
            seed: Some(42),
        };
        let mut a = BeatQueue::new();
        let mut b = BeatQueue::new();
        RandomEcho::new(settings).schedule_echoes(&origin(100), 0.0, &mut a);
        RandomEcho::new(settings).schedule_echoes(&origin(100), 0.0, &mut b);
        assert_eq!(a.pending(), b.pending());
    }

    #[test]
    fn test_random_only_on_release() {
        let mut fx = RandomEcho::new(RandomEchoSettings {
            repeats: 3,
            seed: Some(1),
        });
        let mut queue = BeatQueue::new();
        let held = origin(100);

        fx.handle_midi(&TimedEvent::note_on(60, 100, 0.0), None, &mut queue);
        assert_eq!(queue.len(), 1);

        fx.handle_midi(&TimedEvent::note_off(60, 2.0), Some(held), &mut queue);
        assert_eq!(queue.len(), 1 + 6 + 1);
        assert_eq!(queue.pending()[1].beat, 2.0);
    }
}
