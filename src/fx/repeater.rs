//! Pulse repeater
//!
//! While the transport plays, every held note is re-struck on a beat grid.
//! The grid spacing is a chosen note length, shortened by a modulation
//! controller (mod wheel by default). Incoming note events are consumed;
//! only the pulses reach the output.

use serde::{Deserialize, Serialize};

use super::MidiEffect;
use crate::midi::duration::{next_quantized_beat, NoteLength, NoteValue, PULSE_LENGTHS};
use crate::midi::events::{MidiEvent, TimedEvent};
use crate::midi::host::MidiHost;
use crate::midi::tracker::{ActiveNote, NoteStateTracker};
use crate::transport::TransportInfo;

/// Upper bound on pulses fired in a single block
pub const MAX_PULSES_PER_BLOCK: usize = 64;

/// Default modulation controller (CC1, mod wheel)
pub const DEFAULT_MOD_CONTROLLER: u8 = 1;

/// How the modulation value scales the pulse length
///
/// Higher controller values always give a shorter (never zero) pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PulseCurve {
    /// `(127 - v) / 127`
    Linear,
    /// Linear factor snapped up to `127 / step` levels, then raised to `exponent`
    Stepped { step: f64, exponent: f64 },
}

impl Default for PulseCurve {
    fn default() -> Self {
        Self::Stepped {
            step: 10.0,
            exponent: 0.9,
        }
    }
}

impl PulseCurve {
    /// Multiplier for the base pulse length, in (0, 1]
    pub fn factor(&self, value: u8) -> f64 {
        // 127 would give a zero-length pulse
        let v = value.min(126) as f64;
        let linear = (127.0 - v) / 127.0;

        match *self {
            Self::Linear => linear,
            Self::Stepped { step, exponent } => {
                let levels = (127.0 / step).floor().max(1.0);
                ((linear * levels).ceil() / levels).powf(exponent).min(1.0)
            }
        }
    }

    fn sanitized(self) -> Self {
        match self {
            Self::Linear => Self::Linear,
            Self::Stepped { step, exponent } => Self::Stepped {
                step: step.clamp(1.0, 127.0),
                exponent: exponent.clamp(0.1, 4.0),
            },
        }
    }
}

/// Which controller modulates the pulse, and how
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationSettings {
    pub controller: u8,
    pub curve: PulseCurve,
}

impl Default for ModulationSettings {
    fn default() -> Self {
        Self {
            controller: DEFAULT_MOD_CONTROLLER,
            curve: PulseCurve::default(),
        }
    }
}

/// Repeater parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterSettings {
    /// Base pulse length, one of `PULSE_LENGTHS`
    pub pulse: NoteLength,
    /// Gate length of each pulse, percent of the pulse (1-99)
    pub duration_percent: f64,
    pub modulation: ModulationSettings,
    /// Move note offs that would land past the cycle end to the cycle start
    pub loop_aware: bool,
}

impl Default for RepeaterSettings {
    fn default() -> Self {
        Self {
            pulse: PULSE_LENGTHS[0],
            duration_percent: 50.0,
            modulation: ModulationSettings::default(),
            loop_aware: true,
        }
    }
}

impl RepeaterSettings {
    /// Clamp every field into its valid range
    pub fn sanitized(self) -> Self {
        let pulse = if PULSE_LENGTHS.contains(&self.pulse) {
            self.pulse
        } else {
            log::warn!("Pulse length {} is not offered, using 1/4", self.pulse);
            NoteLength::straight(NoteValue::Quarter)
        };

        let duration_percent = if self.duration_percent.is_finite() {
            self.duration_percent.clamp(1.0, 99.0)
        } else {
            50.0
        };

        Self {
            pulse,
            duration_percent,
            modulation: ModulationSettings {
                controller: self.modulation.controller & 0x7F,
                curve: self.modulation.curve.sanitized(),
            },
            loop_aware: self.loop_aware,
        }
    }
}

/// Transport-following state of the repeater
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeaterState {
    Stopped,
    Playing,
    /// Transport just stopped; held notes and the clock reset next block
    PendingReset,
}

pub struct PulseRepeater {
    settings: RepeaterSettings,
    state: RepeaterState,
    /// Last modulation controller value
    mod_value: u8,
    /// Cached `curve.factor(mod_value)`
    factor: f64,
    /// Next beat a pulse is due
    next_beat: f64,
    last_block_start: f64,
}

impl PulseRepeater {
    pub fn new(settings: RepeaterSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            settings,
            state: RepeaterState::Stopped,
            mod_value: 0,
            factor: settings.modulation.curve.factor(0),
            next_beat: 0.0,
            last_block_start: 0.0,
        }
    }

    pub fn settings(&self) -> &RepeaterSettings {
        &self.settings
    }

    /// Replace the settings, keeping the pulse clock running
    pub fn set_settings(&mut self, settings: RepeaterSettings) {
        self.settings = settings.sanitized();
        self.factor = self.settings.modulation.curve.factor(self.mod_value);
    }

    pub fn state(&self) -> RepeaterState {
        self.state
    }

    pub fn next_beat(&self) -> f64 {
        self.next_beat
    }

    /// Update the modulation value (0-127)
    pub fn set_modulation(&mut self, value: u8) {
        self.mod_value = value & 0x7F;
        self.factor = self.settings.modulation.curve.factor(self.mod_value);
        log::trace!(
            "Pulse modulation {} -> {:.4} beats",
            self.mod_value,
            self.pulse_length()
        );
    }

    /// Current pulse length in beats
    pub fn pulse_length(&self) -> f64 {
        self.settings.pulse.to_beats() * self.factor
    }

    fn reset_clock(&mut self) {
        self.next_beat = 0.0;
        self.last_block_start = 0.0;
    }

    /// Fire every pulse that falls inside the block
    fn fire_pulses(
        &mut self,
        transport: &TransportInfo,
        notes: &NoteStateTracker,
        host: &mut dyn MidiHost,
    ) {
        let start = transport.block_start;
        let end = transport.block_end;

        if start < self.last_block_start {
            log::trace!(
                "Transport jumped back {:.3} -> {:.3}, restarting pulse grid",
                self.last_block_start,
                start
            );
            self.next_beat = 0.0;
        }
        self.last_block_start = start;

        let mut pulse = self.pulse_length();
        if self.next_beat < start {
            self.next_beat = next_quantized_beat(start, pulse);
        }

        let gate = self.settings.duration_percent / 100.0;
        let mut fired = 0;

        while self.next_beat < end {
            if fired == MAX_PULSES_PER_BLOCK {
                log::warn!("Pulse limit reached in block at {:.3}", start);
                break;
            }

            let beat = self.next_beat;
            let mut off_beat = beat + pulse * gate;
            if self.settings.loop_aware && transport.cycling && off_beat >= transport.cycle_right {
                off_beat = transport.cycle_left;
            }

            for note in notes.active_notes() {
                Self::strike(&note, beat, off_beat, host);
            }

            fired += 1;
            pulse = self.pulse_length();
            self.next_beat = next_quantized_beat(beat + pulse, pulse);
        }
    }

    fn strike(note: &ActiveNote, beat: f64, off_beat: f64, host: &mut dyn MidiHost) {
        let on = MidiEvent::note_on(note.note, note.velocity, note.channel);
        let off = MidiEvent::note_off(note.note, note.channel);
        host.send_at_beat(TimedEvent::new(on, beat), beat);
        host.send_at_beat(TimedEvent::new(off, off_beat), off_beat);
    }
}

impl MidiEffect for PulseRepeater {
    fn handle_midi(&mut self, event: &TimedEvent, _origin: Option<ActiveNote>, host: &mut dyn MidiHost) {
        match event.message {
            // Held notes are replayed by the pulses
            MidiEvent::NoteOn { .. } | MidiEvent::NoteOff { .. } => {}
            MidiEvent::ControlChange {
                controller, value, ..
            } => {
                if controller == self.settings.modulation.controller {
                    self.set_modulation(value);
                }
                host.send(*event);
            }
            _ => host.send(*event),
        }
    }

    fn process_block(
        &mut self,
        transport: &TransportInfo,
        notes: &mut NoteStateTracker,
        host: &mut dyn MidiHost,
    ) {
        match (self.state, transport.playing) {
            (RepeaterState::PendingReset, playing) => {
                notes.clear();
                self.reset_clock();
                self.state = if playing {
                    RepeaterState::Playing
                } else {
                    RepeaterState::Stopped
                };
                log::debug!("Repeater reset, now {:?}", self.state);
                if !playing {
                    return;
                }
            }
            (RepeaterState::Playing, false) => {
                self.state = RepeaterState::PendingReset;
                return;
            }
            (RepeaterState::Stopped, false) => return,
            (_, true) => self.state = RepeaterState::Playing,
        }

        self.fire_pulses(transport, notes, host);
    }
}
