//! Note effects
//!
//! Every incoming event passes through the shared `NoteStateTracker` first
//! and is then handed to exactly one effect, chosen by configuration.
//! Effects that follow the transport also get a tick once per audio block.

pub mod echo;
pub mod mono;
pub mod repeater;

use crate::config::EffectConfig;
use crate::midi::events::{MidiEvent, TimedEvent};
use crate::midi::host::MidiHost;
use crate::midi::tracker::{ActiveNote, NoteStateTracker};
use crate::transport::TransportInfo;

use echo::{EchoAccelerator, RandomEcho};
use mono::Monophonizer;
use repeater::PulseRepeater;

/// A note effect driven by the host callbacks
pub trait MidiEffect {
    /// Handle one incoming event after the tracker has seen it
    ///
    /// `origin` is the note on a matched note off released.
    fn handle_midi(&mut self, event: &TimedEvent, origin: Option<ActiveNote>, host: &mut dyn MidiHost);

    /// Called once per audio block
    fn process_block(
        &mut self,
        _transport: &TransportInfo,
        _notes: &mut NoteStateTracker,
        _host: &mut dyn MidiHost,
    ) {
    }
}

/// The configured effect
pub enum Effect {
    Repeater(PulseRepeater),
    Echo(EchoAccelerator),
    RandomEcho(RandomEcho),
    Monophony(Monophonizer),
}

impl Effect {
    pub fn from_config(config: &EffectConfig) -> Self {
        match config {
            EffectConfig::Repeater(settings) => Self::Repeater(PulseRepeater::new(*settings)),
            EffectConfig::Echo(settings) => Self::Echo(EchoAccelerator::new(*settings)),
            EffectConfig::RandomEcho(settings) => Self::RandomEcho(RandomEcho::new(*settings)),
            EffectConfig::Monophony => Self::Monophony(Monophonizer::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Repeater(_) => "repeater",
            Self::Echo(_) => "echo",
            Self::RandomEcho(_) => "random_echo",
            Self::Monophony(_) => "monophony",
        }
    }

    fn as_effect_mut(&mut self) -> &mut dyn MidiEffect {
        match self {
            Self::Repeater(fx) => fx,
            Self::Echo(fx) => fx,
            Self::RandomEcho(fx) => fx,
            Self::Monophony(fx) => fx,
        }
    }

    /// Update settings in place when `config` names the same effect
    ///
    /// Returns false when the effect kind differs.
    fn update(&mut self, config: &EffectConfig) -> bool {
        match (self, config) {
            (Self::Repeater(fx), EffectConfig::Repeater(settings)) => fx.set_settings(*settings),
            (Self::Echo(fx), EffectConfig::Echo(settings)) => fx.set_settings(*settings),
            (Self::RandomEcho(fx), EffectConfig::RandomEcho(settings)) => fx.set_settings(*settings),
            (Self::Monophony(_), EffectConfig::Monophony) => {}
            _ => return false,
        }
        true
    }
}

/// Tracker plus the configured effect; the host-facing entry points
pub struct NoteProcessor {
    tracker: NoteStateTracker,
    effect: Effect,
}

impl NoteProcessor {
    pub fn new(config: &EffectConfig) -> Self {
        let effect = Effect::from_config(config);
        log::info!("Note processor using {} effect", effect.name());
        Self {
            tracker: NoteStateTracker::new(),
            effect,
        }
    }

    /// Host callback for each incoming MIDI event
    pub fn handle_midi(&mut self, mut event: TimedEvent, host: &mut dyn MidiHost) {
        if event.message == MidiEvent::AllNotesOff {
            self.tracker.clear();
        }
        let origin = self.tracker.observe(&mut event);
        self.effect.as_effect_mut().handle_midi(&event, origin, host);
    }

    /// Host callback once per audio block
    pub fn process_block(&mut self, transport: &TransportInfo, host: &mut dyn MidiHost) {
        self.effect
            .as_effect_mut()
            .process_block(transport, &mut self.tracker, host);
    }

    /// Apply a parameter change
    ///
    /// Settings for the running effect change in place and keep its
    /// scheduling state. Switching to another effect silences everything
    /// first. Returns true when the effect was replaced.
    pub fn apply_config(&mut self, config: &EffectConfig, host: &mut dyn MidiHost) -> bool {
        if self.effect.update(config) {
            log::debug!("Updated {} settings: {:?}", self.effect.name(), config);
            return false;
        }

        let effect = Effect::from_config(config);
        log::info!("Switching effect {} -> {}", self.effect.name(), effect.name());
        host.all_notes_off();
        self.tracker.clear();
        self.effect = effect;
        true
    }

    pub fn tracker(&self) -> &NoteStateTracker {
        &self.tracker
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

/// Sends one panic and clears held notes when the transport stops
///
/// Re-arms as soon as the transport plays again.
#[derive(Debug, Default)]
pub struct StopLatch {
    notes_off_sent: bool,
}

impl StopLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true on the block where the panic was sent
    pub fn update(
        &mut self,
        transport: &TransportInfo,
        notes: &mut NoteStateTracker,
        host: &mut dyn MidiHost,
    ) -> bool {
        if !transport.playing && !self.notes_off_sent {
            log::debug!("Transport stopped, sending all notes off");
            host.all_notes_off();
            notes.clear();
            self.notes_off_sent = true;
            return true;
        }

        if transport.playing && self.notes_off_sent {
            self.notes_off_sent = false;
        }
        false
    }
}
