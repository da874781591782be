//! Standard MIDI file input and output
//!
//! Reads every track of a .mid file into one beat-sorted event list the
//! offline runner can feed to the effects, and writes rendered output back
//! as a single-track file.

use std::path::Path;

use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use super::events::{MidiEvent, TimedEvent, CC_ALL_NOTES_OFF};

/// Resolution used when writing files
pub const DEFAULT_TICKS_PER_BEAT: u16 = 480;

/// A tempo change in a MIDI file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEvent {
    /// Position in beats where this tempo starts
    pub beat: f64,
    /// Tempo in BPM
    pub bpm: f64,
}

/// A parsed MIDI file, flattened to one timeline
#[derive(Debug)]
pub struct MidiSong {
    /// Ticks per beat (from MIDI header)
    pub ticks_per_beat: u16,
    /// Initial BPM (tempo at beat 0)
    pub bpm: f64,
    /// Tempo changes, always starting with one at beat 0
    pub tempo_map: Vec<TempoEvent>,
    /// Channel messages from every track, sorted by beat
    pub events: Vec<TimedEvent>,
    /// Beat of the last event in any track
    pub length_beats: f64,
}

impl MidiSong {
    /// Check if the file has tempo automation (more than one tempo event)
    pub fn has_tempo_automation(&self) -> bool {
        self.tempo_map.len() > 1
    }
}

/// Load a MIDI file from disk
pub fn load_song(path: &Path) -> Result<MidiSong, String> {
    let data = std::fs::read(path).map_err(|e| format!("Failed to read MIDI file: {}", e))?;
    let song = parse_song(&data)?;
    log::info!(
        "Loaded {}: {} events, {:.1} beats at {:.1} BPM",
        path.display(),
        song.events.len(),
        song.length_beats,
        song.bpm
    );
    Ok(song)
}

/// Parse MIDI file bytes
pub fn parse_song(data: &[u8]) -> Result<MidiSong, String> {
    let smf = Smf::parse(data).map_err(|e| format!("Failed to parse MIDI file: {}", e))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int(),
        Timing::Timecode(fps, tpf) => {
            // Rough approximation for SMPTE timing
            (fps.as_f32() * tpf as f32 / 2.0) as u16
        }
    };
    if ticks_per_beat == 0 {
        return Err("MIDI file has zero ticks per beat".to_string());
    }
    let tpb = ticks_per_beat as f64;

    let mut tempo_map: Vec<TempoEvent> = Vec::new();
    let mut events: Vec<TimedEvent> = Vec::new();
    let mut last_tick: u64 = 0;

    for track in &smf.tracks {
        let mut current_tick: u64 = 0;
        for event in track {
            current_tick += event.delta.as_int() as u64;
            let beat = current_tick as f64 / tpb;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                    let bpm = 60_000_000.0 / tempo.as_int().max(1) as f64;
                    tempo_map.push(TempoEvent { beat, bpm });
                }
                TrackEventKind::Midi { channel, message } => {
                    if let Some(message) = decode_message(channel.as_int(), message) {
                        events.push(TimedEvent::new(message, beat));
                    }
                }
                _ => {}
            }
        }
        last_tick = last_tick.max(current_tick);
    }

    // Stable, so simultaneous events keep their track order
    events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    tempo_map.sort_by(|a, b| a.beat.total_cmp(&b.beat));

    // MIDI default is 120 BPM until the first tempo event
    if tempo_map.first().map_or(true, |t| t.beat > 0.0) {
        tempo_map.insert(0, TempoEvent { beat: 0.0, bpm: 120.0 });
    }
    let song = MidiSong {
        ticks_per_beat,
        bpm: tempo_map[0].bpm,
        tempo_map,
        events,
        length_beats: last_tick as f64 / tpb,
    };

    if song.has_tempo_automation() {
        log::warn!(
            "MIDI file has {} tempo changes, rendering at a constant {:.1} BPM",
            song.tempo_map.len() - 1,
            song.bpm
        );
    }

    Ok(song)
}

fn decode_message(channel: u8, message: MidiMessage) -> Option<MidiEvent> {
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
            Some(MidiEvent::note_on(key.as_int(), vel.as_int(), channel))
        }
        // Note on with velocity 0 is a note off
        MidiMessage::NoteOn { key, .. } => Some(MidiEvent::note_off(key.as_int(), channel)),
        MidiMessage::NoteOff { key, vel } => Some(MidiEvent::NoteOff {
            note: key.as_int(),
            velocity: vel.as_int(),
            channel,
        }),
        MidiMessage::Controller { controller, .. } if controller.as_int() == CC_ALL_NOTES_OFF => {
            Some(MidiEvent::AllNotesOff)
        }
        MidiMessage::Controller { controller, value } => Some(MidiEvent::control_change(
            controller.as_int(),
            value.as_int(),
            channel,
        )),
        MidiMessage::PitchBend { bend } => Some(MidiEvent::PitchBend {
            value: bend.0.as_int(),
            channel,
        }),
        _ => None,
    }
}

fn encode_message(message: MidiEvent, out: &mut Vec<TrackEventKind<'static>>) {
    let midi = |channel: u8, message: MidiMessage| TrackEventKind::Midi {
        channel: u4::new(channel & 0x0F),
        message,
    };

    match message {
        MidiEvent::NoteOn {
            note,
            velocity,
            channel,
        } => out.push(midi(
            channel,
            MidiMessage::NoteOn {
                key: u7::new(note & 0x7F),
                vel: u7::new(velocity & 0x7F),
            },
        )),
        MidiEvent::NoteOff {
            note,
            velocity,
            channel,
        } => out.push(midi(
            channel,
            MidiMessage::NoteOff {
                key: u7::new(note & 0x7F),
                vel: u7::new(velocity & 0x7F),
            },
        )),
        MidiEvent::ControlChange {
            controller,
            value,
            channel,
        } => out.push(midi(
            channel,
            MidiMessage::Controller {
                controller: u7::new(controller & 0x7F),
                value: u7::new(value & 0x7F),
            },
        )),
        MidiEvent::PitchBend { value, channel } => out.push(midi(
            channel,
            MidiMessage::PitchBend {
                bend: midly::PitchBend(u14::new(value & 0x3FFF)),
            },
        )),
        // A file has no host to panic, so spell it out on every channel
        MidiEvent::AllNotesOff => {
            for channel in 0..16 {
                out.push(midi(
                    channel,
                    MidiMessage::Controller {
                        controller: u7::new(CC_ALL_NOTES_OFF),
                        value: u7::new(0),
                    },
                ));
            }
        }
    }
}

/// Build a single-track file from beat-sorted messages
pub fn build_song(messages: &[(f64, MidiEvent)], bpm: f64, ticks_per_beat: u16) -> Smf<'static> {
    let ticks_per_beat = ticks_per_beat.clamp(1, 0x7FFF);
    let us_per_beat = (60_000_000.0 / bpm.max(1.0)).round() as u32;

    let mut track: Vec<TrackEvent<'static>> = Vec::with_capacity(messages.len() + 2);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_beat.min(0xFF_FFFF)))),
    });

    let mut kinds = Vec::with_capacity(16);
    let mut last_tick: u32 = 0;
    for &(beat, message) in messages {
        let tick = (beat.max(0.0) * ticks_per_beat as f64).round() as u32;
        let mut delta = tick.saturating_sub(last_tick);
        last_tick = last_tick.max(tick);

        kinds.clear();
        encode_message(message, &mut kinds);
        for kind in kinds.drain(..) {
            track.push(TrackEvent {
                delta: u28::new(delta.min(0x0FFF_FFFF)),
                kind,
            });
            delta = 0;
        }
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(ticks_per_beat))),
        tracks: vec![track],
    }
}

/// Write beat-sorted messages to a MIDI file
pub fn save_song(path: &Path, messages: &[(f64, MidiEvent)], bpm: f64) -> Result<(), String> {
    let smf = build_song(messages, bpm, DEFAULT_TICKS_PER_BEAT);
    smf.save(path)
        .map_err(|e| format!("Failed to write MIDI file {}: {}", path.display(), e))?;
    log::info!("Wrote {} messages to {}", messages.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_bytes(smf: &Smf) -> Vec<u8> {
        let mut data = Vec::new();
        smf.write_std(&mut data).unwrap();
        data
    }

    fn tempo(delta: u32, us_per_beat: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_beat))),
        }
    }

    fn single_track(events: Vec<TrackEvent<'static>>) -> Smf<'static> {
        Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(96))),
            tracks: vec![events],
        }
    }

    #[test]
    fn test_tempo_calculation() {
        // 600000 us per beat = 100 BPM, then 500000 = 120 BPM at beat 4
        let smf = single_track(vec![tempo(0, 600_000), tempo(4 * 96, 500_000)]);
        let song = parse_song(&to_bytes(&smf)).unwrap();

        assert!((song.bpm - 100.0).abs() < 1e-9);
        assert_eq!(song.tempo_map.len(), 2);
        assert_eq!(song.tempo_map[1].beat, 4.0);
        assert!((song.tempo_map[1].bpm - 120.0).abs() < 1e-9);
        assert!(song.has_tempo_automation());
    }

    #[test]
    fn test_late_first_tempo_gets_default() {
        let smf = single_track(vec![tempo(2 * 96, 1_000_000)]);
        let song = parse_song(&to_bytes(&smf)).unwrap();

        assert_eq!(song.bpm, 120.0);
        assert_eq!(
            song.tempo_map,
            [
                TempoEvent { beat: 0.0, bpm: 120.0 },
                TempoEvent { beat: 2.0, bpm: 60.0 },
            ]
        );
        assert!(song.has_tempo_automation());
    }

    #[test]
    fn test_written_song_reads_back() {
        let messages = [
            (0.0, MidiEvent::note_on(60, 100, 0)),
            (0.5, MidiEvent::control_change(1, 64, 0)),
            (1.0, MidiEvent::note_off(60, 0)),
            (1.25, MidiEvent::PitchBend { value: 8192, channel: 2 }),
        ];
        let song = parse_song(&to_bytes(&build_song(&messages, 90.0, 480))).unwrap();

        assert_eq!(song.ticks_per_beat, 480);
        assert!((song.bpm - 90.0).abs() < 0.01);
        assert!(!song.has_tempo_automation());
        assert_eq!(song.length_beats, 1.25);

        let decoded: Vec<(f64, MidiEvent)> = song.events.iter().map(|e| (e.beat, e.message)).collect();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_panic_written_on_every_channel() {
        let smf = build_song(&[(2.0, MidiEvent::AllNotesOff)], 120.0, 480);
        let song = parse_song(&to_bytes(&smf)).unwrap();

        // Read back as 16 panics at the same beat
        assert_eq!(song.events.len(), 16);
        assert!(song
            .events
            .iter()
            .all(|e| e.message == MidiEvent::AllNotesOff && e.beat == 2.0));
    }

    #[test]
    fn test_zero_velocity_note_on_is_note_off() {
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(96))),
            tracks: vec![vec![
                TrackEvent {
                    delta: u28::new(0),
                    kind: TrackEventKind::Midi {
                        channel: u4::new(0),
                        message: MidiMessage::NoteOn {
                            key: u7::new(60),
                            vel: u7::new(100),
                        },
                    },
                },
                TrackEvent {
                    delta: u28::new(48),
                    kind: TrackEventKind::Midi {
                        channel: u4::new(0),
                        message: MidiMessage::NoteOn {
                            key: u7::new(60),
                            vel: u7::new(0),
                        },
                    },
                },
            ]],
        };
        let song = parse_song(&to_bytes(&smf)).unwrap();

        assert_eq!(song.bpm, 120.0);
        assert_eq!(song.events[1].beat, 0.5);
        assert!(matches!(song.events[1].message, MidiEvent::NoteOff { note: 60, .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = parse_song(b"not a midi file").unwrap_err();
        assert!(err.starts_with("Failed to parse MIDI file"));
    }
}
