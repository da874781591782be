//! MIDI plumbing shared by the effects and the runners
//!
//! Provides event types, note lengths, held-note tracking, the host output
//! boundary, MIDI file support and device I/O.

pub mod device;
pub mod duration;
pub mod events;
pub mod file;
pub mod host;
pub mod player;
pub mod tracker;

pub use duration::{LengthSelector, NoteLength};
pub use events::{InputQueue, MidiEvent, TimedEvent};
pub use host::{BeatQueue, MidiHost};
pub use player::{LiveEngine, LiveRunner, MidiSink};
pub use tracker::{ActiveNote, NoteStateTracker};
