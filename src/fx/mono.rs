//! Last-note-priority monophony
//!
//! Keeps at most one note sounding. A new note steals the voice from the
//! current one; releasing the newest note hands the voice back to the most
//! recent note that is still held.

use super::MidiEffect;
use crate::midi::events::{MidiEvent, TimedEvent};
use crate::midi::host::MidiHost;
use crate::midi::tracker::ActiveNote;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Voice {
    note: u8,
    velocity: u8,
    channel: u8,
}

/// Voice stack plus the set of pitches physically held
///
/// The stack can hold stale entries for pitches released beneath the top;
/// they are dropped lazily whenever they reach the top.
pub struct Monophonizer {
    stack: Vec<Voice>,
    held: [bool; 128],
    held_count: usize,
}

impl Monophonizer {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(128),
            held: [false; 128],
            held_count: 0,
        }
    }

    /// Pitch currently sounding, if any
    pub fn sounding(&self) -> Option<u8> {
        self.stack.last().map(|v| v.note)
    }

    pub fn is_held(&self, note: u8) -> bool {
        self.held[(note & 0x7F) as usize]
    }

    fn set_held(&mut self, note: u8, held: bool) {
        let slot = &mut self.held[(note & 0x7F) as usize];
        if *slot != held {
            *slot = held;
            if held {
                self.held_count += 1;
            } else {
                self.held_count -= 1;
            }
        }
    }

    /// Drop released pitches off the top of the stack
    fn prune(&mut self) {
        while let Some(top) = self.stack.last() {
            if self.is_held(top.note) {
                break;
            }
            self.stack.pop();
        }
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.held = [false; 128];
        self.held_count = 0;
    }

    fn note_on(&mut self, event: &TimedEvent, voice: Voice, host: &mut dyn MidiHost) {
        if self.is_held(voice.note) {
            log::trace!("Note {} already held, ignoring retrigger", voice.note);
            return;
        }

        self.prune();
        if let Some(top) = self.stack.last() {
            let off = MidiEvent::note_off(top.note, top.channel);
            host.send(TimedEvent::new(off, event.beat));
        }

        self.stack.push(voice);
        self.set_held(voice.note, true);
        host.send(*event);
    }

    fn note_off(&mut self, event: &TimedEvent, note: u8, host: &mut dyn MidiHost) {
        if self.stack.is_empty() || self.held_count == 0 {
            log::debug!("Note off {} with no voices held, resetting", note);
            host.all_notes_off();
            self.reset();
            host.send(*event);
            return;
        }

        let mut fallback = None;
        if let Some(released) = self.stack.last().copied() {
            if released.note == note {
                self.stack.pop();
                self.prune();
                // The returning voice takes over the released voice's velocity
                if let Some(top) = self.stack.last_mut() {
                    if top.note != note {
                        top.velocity = released.velocity;
                        fallback = Some(*top);
                    }
                }
            } else {
                log::trace!("Note {} released beneath the sounding voice", note);
            }
        }

        self.set_held(note, false);
        self.prune();
        host.send(*event);

        if let Some(voice) = fallback {
            let on = MidiEvent::note_on(voice.note, voice.velocity, voice.channel);
            host.send(TimedEvent::new(on, event.beat));
        }
    }
}

impl Default for Monophonizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiEffect for Monophonizer {
    fn handle_midi(&mut self, event: &TimedEvent, _origin: Option<ActiveNote>, host: &mut dyn MidiHost) {
        match event.message {
            MidiEvent::NoteOn {
                note,
                velocity,
                channel,
            } => {
                let voice = Voice {
                    note,
                    velocity,
                    channel,
                };
                self.note_on(event, voice, host);
            }
            MidiEvent::NoteOff { note, .. } => self.note_off(event, note, host),
            MidiEvent::AllNotesOff => {
                self.reset();
                host.send(*event);
            }
            _ => host.send(*event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::host::BeatQueue;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Debug, PartialEq)]
    enum Out {
        On(u8, u8),
        Off(u8),
        Panic,
    }

    fn outputs(queue: &BeatQueue) -> Vec<Out> {
        queue
            .pending()
            .iter()
            .filter_map(|s| match s.message {
                MidiEvent::NoteOn { note, velocity, .. } => Some(Out::On(note, velocity)),
                MidiEvent::NoteOff { note, .. } => Some(Out::Off(note)),
                MidiEvent::AllNotesOff => Some(Out::Panic),
                _ => None,
            })
            .collect()
    }

    fn play(fx: &mut Monophonizer, queue: &mut BeatQueue, event: TimedEvent) {
        fx.handle_midi(&event, None, queue);
    }

    #[test]
    fn test_steal_and_return() {
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();

        play(&mut fx, &mut queue, TimedEvent::note_on(60, 100, 0.0));
        play(&mut fx, &mut queue, TimedEvent::note_on(64, 90, 0.5));
        play(&mut fx, &mut queue, TimedEvent::note_off(64, 1.0));
        play(&mut fx, &mut queue, TimedEvent::note_off(60, 1.5));

        assert_eq!(
            outputs(&queue),
            [
                Out::On(60, 100),
                Out::Off(60),
                Out::On(64, 90),
                Out::Off(64),
                Out::On(60, 90),
                Out::Off(60),
            ]
        );
        assert_eq!(fx.sounding(), None);
    }

    #[test]
    fn test_release_beneath_top_is_silent() {
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();

        play(&mut fx, &mut queue, TimedEvent::note_on(60, 100, 0.0));
        play(&mut fx, &mut queue, TimedEvent::note_on(64, 100, 0.5));
        play(&mut fx, &mut queue, TimedEvent::note_off(60, 1.0));
        assert_eq!(fx.sounding(), Some(64));

        // 60 was released underneath, so nothing comes back
        play(&mut fx, &mut queue, TimedEvent::note_off(64, 1.5));
        assert_eq!(fx.sounding(), None);
        assert_eq!(
            outputs(&queue),
            [
                Out::On(60, 100),
                Out::Off(60),
                Out::On(64, 100),
                Out::Off(60),
                Out::Off(64),
            ]
        );
    }

    #[test]
    fn test_duplicate_note_on_suppressed() {
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();

        play(&mut fx, &mut queue, TimedEvent::note_on(60, 100, 0.0));
        play(&mut fx, &mut queue, TimedEvent::note_on(60, 110, 0.5));
        assert_eq!(outputs(&queue), [Out::On(60, 100)]);
    }

    #[test]
    fn test_stray_note_off_panics() {
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();

        play(&mut fx, &mut queue, TimedEvent::note_off(60, 0.0));
        assert_eq!(outputs(&queue), [Out::Panic, Out::Off(60)]);

        // State is usable afterwards
        play(&mut fx, &mut queue, TimedEvent::note_on(62, 80, 1.0));
        assert_eq!(fx.sounding(), Some(62));
    }

    #[test]
    fn test_out_of_range_note_falls_back() {
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();

        let high = MidiEvent::NoteOn { note: 200, velocity: 100, channel: 0 };
        play(&mut fx, &mut queue, TimedEvent::new(high, 0.0));
        play(&mut fx, &mut queue, TimedEvent::note_on(60, 80, 0.5));
        play(&mut fx, &mut queue, TimedEvent::note_off(60, 1.0));
        assert_eq!(fx.sounding(), Some(200));
    }

    #[test]
    fn test_other_events_pass_through() {
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();
        play(&mut fx, &mut queue, TimedEvent::control_change(64, 127, 0.0));
        assert_eq!(queue.len(), 1);
        assert_eq!(fx.sounding(), None);
    }

    #[test]
    fn test_never_two_voices_sounding() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut fx = Monophonizer::new();
        let mut queue = BeatQueue::new();
        let mut held: Vec<u8> = Vec::new();

        for step in 0..2000 {
            let beat = step as f64 * 0.25;
            let note = rng.gen_range(60..68u8);
            let event = if let Some(pos) = held.iter().position(|&n| n == note) {
                held.remove(pos);
                TimedEvent::note_off(note, beat)
            } else {
                held.push(note);
                TimedEvent::note_on(note, rng.gen_range(1..128u8), beat)
            };
            play(&mut fx, &mut queue, event);

            // Newest still-held note owns the voice
            assert_eq!(fx.sounding(), held.last().copied(), "step {}", step);
        }

        let mut sounding: Vec<u8> = Vec::new();
        for out in outputs(&queue) {
            match out {
                Out::On(note, _) => {
                    sounding.push(note);
                    assert!(sounding.len() <= 1, "two voices: {:?}", sounding);
                }
                Out::Off(note) => sounding.retain(|&n| n != note),
                Out::Panic => sounding.clear(),
            }
        }
    }
}
