//! Offline rendering of a MIDI file through an effect
//!
//! Plays the song through the block clock as a host would, optionally
//! looping a cycle region, and collects everything the effect emits on a
//! linear timeline so the result can be written back out as a file.

use std::path::Path;

use crate::config::{Config, EffectConfig};
use crate::fx::NoteProcessor;
use crate::midi::events::{MidiEvent, TimedEvent};
use crate::midi::file::{self, MidiSong};
use crate::midi::host::{BeatQueue, MidiHost};
use crate::transport::{Cycle, Timeline, TransportInfo};

/// Stopped blocks run after the song so stop handling can finish
const STOPPED_TAIL_BLOCKS: usize = 2;

/// Result of a render
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Output messages on the linear timeline, earliest first
    pub messages: Vec<(f64, MidiEvent)>,
    pub blocks: usize,
    pub input_events: usize,
}

/// Host view for one block: maps song beats to linear beats
///
/// Inside a cycle, a beat before the block start was wrapped to the left
/// edge and belongs to the next pass.
struct ReplayHost<'a> {
    queue: &'a mut BeatQueue,
    transport: TransportInfo,
    /// Linear beat minus song beat for this block
    offset: f64,
}

impl ReplayHost<'_> {
    fn linear(&self, beat: f64) -> f64 {
        let mut linear = beat + self.offset;
        if self.transport.cycling && beat < self.transport.block_start {
            linear += self.transport.cycle_right - self.transport.cycle_left;
        }
        linear
    }
}

impl MidiHost for ReplayHost<'_> {
    fn send(&mut self, event: TimedEvent) {
        let beat = self.linear(event.beat);
        self.queue.send_at_beat(event, beat);
    }

    fn send_at_beat(&mut self, event: TimedEvent, beat: f64) {
        let beat = self.linear(beat);
        self.queue.send_at_beat(event, beat);
    }

    fn all_notes_off(&mut self) {
        self.queue.all_notes_off();
    }
}

/// Run a song through an effect
pub fn render(song: &MidiSong, effect: &EffectConfig, block_beats: f64, cycle: Option<Cycle>) -> Rendered {
    let mut processor = NoteProcessor::new(effect);
    let mut queue = BeatQueue::new();
    let events = &song.events;

    // One extra block so events on the final tick are delivered
    let timeline = Timeline::new(song.length_beats + block_beats, block_beats, cycle);

    let mut blocks = 0;
    let mut input_events = 0;
    let mut song_end = 0.0;
    let mut linear_end = 0.0;

    for block in timeline {
        let transport = block.transport;
        queue.set_now(block.linear_start);

        let mut host = ReplayHost {
            queue: &mut queue,
            transport,
            offset: block.linear_start - transport.block_start,
        };

        let first = events.partition_point(|e| e.beat < transport.block_start);
        let last = events.partition_point(|e| e.beat < transport.block_end);
        for event in &events[first..last] {
            processor.handle_midi(*event, &mut host);
        }
        input_events += last - first;

        processor.process_block(&transport, &mut host);

        blocks += 1;
        song_end = transport.block_end;
        linear_end = block.linear_start + (transport.block_end - transport.block_start);
    }

    let stopped = TransportInfo::stopped(song_end);
    for _ in 0..STOPPED_TAIL_BLOCKS {
        queue.set_now(linear_end);
        let mut host = ReplayHost {
            queue: &mut queue,
            transport: stopped,
            offset: linear_end - song_end,
        };
        processor.process_block(&stopped, &mut host);
    }

    let mut scheduled = Vec::with_capacity(queue.len());
    queue.drain_all(&mut scheduled);

    log::debug!(
        "Rendered {} blocks, {} input events -> {} output messages",
        blocks,
        input_events,
        scheduled.len()
    );

    Rendered {
        messages: scheduled.into_iter().map(|s| (s.beat, s.message)).collect(),
        blocks,
        input_events,
    }
}

/// Render `input` through the configured effect and write `output`
pub fn replay_file(input: &Path, output: &Path, config: &Config, cycle: Option<Cycle>) -> Result<Rendered, String> {
    let song = file::load_song(input)?;
    let rendered = render(&song, &config.effect, config.transport.block_beats, cycle);
    file::save_song(output, &rendered.messages, song.bpm)?;
    Ok(rendered)
}
