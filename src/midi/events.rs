//! MIDI event types, beat-stamped events, and the live input queue
//!
//! `MidiEvent` is the raw channel message. `TimedEvent` places a message on the
//! host's beat timeline and carries the note duration computed by the tracker.
//! `InputQueue` hands decoded messages from the device callback to the
//! processing thread through a lock-free ring buffer.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};

/// Controller number that MIDI reserves for "all notes off"
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// MIDI event types handled by the note effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note on event
    NoteOn {
        /// MIDI note number (0-127)
        note: u8,
        /// Velocity (1-127)
        velocity: u8,
        /// MIDI channel (0-15)
        channel: u8,
    },
    /// Note off event
    NoteOff {
        /// MIDI note number (0-127)
        note: u8,
        /// Release velocity (0-127, often ignored)
        velocity: u8,
        /// MIDI channel (0-15)
        channel: u8,
    },
    /// Control change (CC) event
    ControlChange {
        /// Controller number (0-127)
        controller: u8,
        /// Controller value (0-127)
        value: u8,
        /// MIDI channel (0-15)
        channel: u8,
    },
    /// Pitch bend event
    PitchBend {
        /// 14-bit pitch bend value (0-16383, center at 8192)
        value: u16,
        /// MIDI channel (0-15)
        channel: u8,
    },
    /// All notes off - host-level panic
    AllNotesOff,
}

impl MidiEvent {
    /// Create a note on event
    #[inline]
    pub fn note_on(note: u8, velocity: u8, channel: u8) -> Self {
        Self::NoteOn {
            note: note & 0x7F,
            velocity: velocity & 0x7F,
            channel: channel & 0x0F,
        }
    }

    /// Create a note off event
    #[inline]
    pub fn note_off(note: u8, channel: u8) -> Self {
        Self::NoteOff {
            note: note & 0x7F,
            velocity: 0,
            channel: channel & 0x0F,
        }
    }

    /// Create a control change event
    #[inline]
    pub fn control_change(controller: u8, value: u8, channel: u8) -> Self {
        Self::ControlChange {
            controller: controller & 0x7F,
            value: value & 0x7F,
            channel: channel & 0x0F,
        }
    }

    /// Note number for note on/off events
    #[inline]
    pub fn note(&self) -> Option<u8> {
        match *self {
            Self::NoteOn { note, .. } | Self::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }

    /// Decode a raw channel message
    ///
    /// Note on with velocity 0 becomes a note off, and CC 123 becomes
    /// `AllNotesOff`. Messages the effects don't handle return `None`.
    pub fn from_bytes(message: &[u8]) -> Option<Self> {
        if message.len() < 3 {
            return None;
        }

        let status = message[0];
        let channel = status & 0x0F;
        let data1 = message[1] & 0x7F;
        let data2 = message[2] & 0x7F;

        match status & 0xF0 {
            0x80 => Some(Self::NoteOff {
                note: data1,
                velocity: data2,
                channel,
            }),
            0x90 if data2 == 0 => Some(Self::NoteOff {
                note: data1,
                velocity: 0,
                channel,
            }),
            0x90 => Some(Self::NoteOn {
                note: data1,
                velocity: data2,
                channel,
            }),
            0xB0 if data1 == CC_ALL_NOTES_OFF => Some(Self::AllNotesOff),
            0xB0 => Some(Self::ControlChange {
                controller: data1,
                value: data2,
                channel,
            }),
            0xE0 => Some(Self::PitchBend {
                value: ((data2 as u16) << 7) | data1 as u16,
                channel,
            }),
            _ => None,
        }
    }

    /// Encode as a 3-byte channel message
    ///
    /// `AllNotesOff` encodes as CC 123 on channel 1; the output device
    /// repeats it for every channel.
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            Self::NoteOn {
                note,
                velocity,
                channel,
            } => [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            Self::NoteOff {
                note,
                velocity,
                channel,
            } => [0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            Self::ControlChange {
                controller,
                value,
                channel,
            } => [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            Self::PitchBend { value, channel } => [
                0xE0 | (channel & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            Self::AllNotesOff => [0xB0, CC_ALL_NOTES_OFF, 0],
        }
    }
}

/// A MIDI message placed on the host's beat timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub message: MidiEvent,
    /// Position in beats (quarter note = 1.0)
    pub beat: f64,
    /// Held length in beats, set by the note tracker on a matched note off
    pub duration: Option<f64>,
}

impl TimedEvent {
    pub fn new(message: MidiEvent, beat: f64) -> Self {
        Self {
            message,
            beat,
            duration: None,
        }
    }

    pub fn note_on(note: u8, velocity: u8, beat: f64) -> Self {
        Self::new(MidiEvent::note_on(note, velocity, 0), beat)
    }

    pub fn note_off(note: u8, beat: f64) -> Self {
        Self::new(MidiEvent::note_off(note, 0), beat)
    }

    pub fn control_change(controller: u8, value: u8, beat: f64) -> Self {
        Self::new(MidiEvent::control_change(controller, value, 0), beat)
    }
}

/// Thread-safe queue from the MIDI input callback to the processing thread
///
/// Producer side is locked by the device callback only.
/// Consumer side uses try_lock so the processing thread never blocks.
pub struct InputQueue {
    producer: Mutex<ringbuf::HeapProd<MidiEvent>>,
    consumer: Mutex<ringbuf::HeapCons<MidiEvent>>,
    capacity: usize,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::new(capacity);
        let (producer, consumer) = rb.split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            capacity,
        }
    }

    /// Push a message; returns false if the queue is full or busy
    #[inline]
    pub fn push(&self, event: MidiEvent) -> bool {
        if let Some(mut producer) = self.producer.try_lock() {
            if producer.try_push(event).is_ok() {
                return true;
            }
            log::debug!("MIDI input queue full (capacity: {}), event dropped", self.capacity);
        }
        false
    }

    /// Drain pending messages into a pre-allocated buffer
    ///
    /// Returns 0 if the consumer lock is held; the messages are picked up
    /// on the next block.
    #[inline]
    pub fn drain_into(&self, buffer: &mut Vec<MidiEvent>) -> usize {
        buffer.clear();

        if let Some(mut consumer) = self.consumer.try_lock() {
            while let Some(event) = consumer.try_pop() {
                buffer.push(event);
            }
        }

        buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.try_lock().map(|c| c.is_empty()).unwrap_or(true)
    }
}
