//! Active note bookkeeping
//!
//! Remembers the most recent unmatched note on per pitch so that a later
//! note off can be given its held duration, and so the schedulers can ask
//! which notes are currently down.

use super::events::{MidiEvent, TimedEvent};

/// Snapshot of the note on that started a held note
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveNote {
    /// MIDI note number (0-127)
    pub note: u8,
    /// Velocity (1-127)
    pub velocity: u8,
    /// MIDI channel (0-15)
    pub channel: u8,
    /// Beat the note on arrived at
    pub beat: f64,
}

/// Pitch-indexed table of held notes
pub struct NoteStateTracker {
    notes: [Option<ActiveNote>; 128],
    count: usize,
}

impl NoteStateTracker {
    pub fn new() -> Self {
        Self {
            notes: [None; 128],
            count: 0,
        }
    }

    /// Update the table from an incoming event
    ///
    /// A note on records (or retriggers) its pitch. A note off on a held
    /// pitch gets `duration` filled in and returns the note on it matches.
    /// The pitch is released either way; other messages are ignored.
    pub fn observe(&mut self, event: &mut TimedEvent) -> Option<ActiveNote> {
        match event.message {
            MidiEvent::NoteOn {
                note,
                velocity,
                channel,
            } => {
                let slot = &mut self.notes[(note & 0x7F) as usize];
                if slot.is_none() {
                    self.count += 1;
                }
                *slot = Some(ActiveNote {
                    note,
                    velocity,
                    channel,
                    beat: event.beat,
                });
                None
            }
            MidiEvent::NoteOff { note, .. } => {
                let origin = self.notes[(note & 0x7F) as usize].take();
                match origin {
                    Some(on) => {
                        self.count -= 1;
                        event.duration = Some(event.beat - on.beat);
                    }
                    None => log::trace!("Unmatched note off: note={}", note),
                }
                origin
            }
            _ => None,
        }
    }

    /// Held notes in ascending pitch order
    pub fn active_notes(&self) -> impl Iterator<Item = ActiveNote> + '_ {
        self.notes.iter().flatten().copied()
    }

    pub fn active_note(&self, note: u8) -> Option<ActiveNote> {
        self.notes.get(note as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Forget every held note
    pub fn clear(&mut self) {
        if self.count > 0 {
            log::debug!("Clearing {} held notes", self.count);
        }
        self.notes = [None; 128];
        self.count = 0;
    }
}

impl Default for NoteStateTracker {
    fn default() -> Self {
        Self::new()
    }
}
