//! Live runner with a wall-clock beat transport
//!
//! A background thread wakes every block period, turns elapsed time into
//! beats at the current tempo, feeds queued input to the note processor,
//! runs its block tick and sends whatever came due to the output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::device::OutputDevice;
use super::events::{InputQueue, MidiEvent, TimedEvent};
use super::host::{BeatQueue, Scheduled};
use crate::config::{Config, EffectConfig};
use crate::fx::NoteProcessor;
use crate::transport::TransportInfo;

/// Destination for processed messages
pub trait MidiSink {
    fn send(&mut self, event: MidiEvent) -> Result<(), String>;
}

impl MidiSink for OutputDevice {
    fn send(&mut self, event: MidiEvent) -> Result<(), String> {
        OutputDevice::send(self, event)
    }
}

/// Processing state driven one block at a time
pub struct LiveEngine {
    processor: NoteProcessor,
    queue: BeatQueue,
    input: Arc<InputQueue>,
    input_buffer: Vec<MidiEvent>,
    due: Vec<Scheduled>,
    /// Beat at the start of the next block
    beat: f64,
}

impl LiveEngine {
    pub fn new(config: &Config, input: Arc<InputQueue>) -> Self {
        let capacity = config.transport.queue_capacity;
        Self {
            processor: NoteProcessor::new(&config.effect),
            queue: BeatQueue::with_capacity(capacity),
            input,
            input_buffer: Vec::with_capacity(capacity),
            due: Vec::with_capacity(capacity),
            beat: 0.0,
        }
    }

    pub fn beat(&self) -> f64 {
        self.beat
    }

    pub fn apply_config(&mut self, config: &EffectConfig) {
        self.queue.set_now(self.beat);
        self.processor.apply_config(config, &mut self.queue);
    }

    /// Run one block covering `beats` of time
    ///
    /// The beat clock always advances so scheduled echoes keep draining;
    /// `playing` only controls what the effects see. Input is stamped at the
    /// block start. Returns the number of messages sent.
    pub fn tick(&mut self, beats: f64, playing: bool, sink: &mut dyn MidiSink) -> usize {
        let block_start = self.beat;
        let block_end = block_start + beats.max(0.0);

        let transport = if playing {
            TransportInfo::playing(block_start, block_end)
        } else {
            TransportInfo::stopped(block_start)
        };

        self.queue.set_now(block_start);
        self.input.drain_into(&mut self.input_buffer);
        for event in self.input_buffer.drain(..) {
            self.processor
                .handle_midi(TimedEvent::new(event, block_start), &mut self.queue);
        }
        self.processor.process_block(&transport, &mut self.queue);

        self.queue.drain_until(block_end, &mut self.due);
        let sent = self.due.len();
        for scheduled in self.due.drain(..) {
            if let Err(e) = sink.send(scheduled.message) {
                log::warn!("{}", e);
            }
        }

        self.beat = block_end;
        sent
    }

    /// Drop anything still scheduled and silence the output
    pub fn flush(&mut self, sink: &mut dyn MidiSink) {
        self.queue.clear();
        if let Err(e) = sink.send(MidiEvent::AllNotesOff) {
            log::warn!("{}", e);
        }
    }
}

/// Shared state between runner thread and main thread
struct RunnerSharedState {
    /// Whether the transport is playing
    is_playing: AtomicBool,
    /// Signal to stop the thread
    should_stop: AtomicBool,
    /// Effect change waiting for the next block
    pending_config: Mutex<Option<EffectConfig>>,
}

/// Live MIDI effect runner
pub struct LiveRunner {
    shared: Arc<RunnerSharedState>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl LiveRunner {
    /// Start processing on a background thread
    pub fn start(config: &Config, input: Arc<InputQueue>, sink: Box<dyn MidiSink + Send>) -> Self {
        let shared = Arc::new(RunnerSharedState {
            is_playing: AtomicBool::new(true),
            should_stop: AtomicBool::new(false),
            pending_config: Mutex::new(None),
        });

        let engine = LiveEngine::new(config, input);
        let bpm = config.transport.bpm;
        let block = Duration::from_millis(config.transport.block_ms);
        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            runner_thread(shared_clone, engine, sink, bpm, block);
        });

        log::info!(
            "Live runner started: {} BPM, {:?} blocks",
            config.transport.bpm,
            block
        );

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Start or stop the transport
    pub fn set_playing(&self, playing: bool) {
        self.shared.is_playing.store(playing, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing.load(Ordering::SeqCst)
    }

    /// Change the effect or its settings on the next block
    pub fn update_effect(&self, config: EffectConfig) {
        *self.shared.pending_config.lock() = Some(config);
    }
}

impl Drop for LiveRunner {
    fn drop(&mut self) {
        self.shared.should_stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        log::info!("Live runner stopped");
    }
}

/// Beats covered by `elapsed` wall time at `bpm`
fn elapsed_beats(elapsed: Duration, bpm: f64) -> f64 {
    elapsed.as_secs_f64() * bpm / 60.0
}

fn runner_thread(
    shared: Arc<RunnerSharedState>,
    mut engine: LiveEngine,
    mut sink: Box<dyn MidiSink + Send>,
    bpm: f64,
    block: Duration,
) {
    let mut last_tick = Instant::now();

    while !shared.should_stop.load(Ordering::SeqCst) {
        thread::sleep(block);

        if let Some(config) = shared.pending_config.lock().take() {
            engine.apply_config(&config);
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last_tick);
        last_tick = now;

        let playing = shared.is_playing.load(Ordering::SeqCst);
        engine.tick(elapsed_beats(elapsed, bpm), playing, sink.as_mut());
    }

    // Let the effects see the transport stop before silencing
    for _ in 0..2 {
        engine.tick(0.0, false, sink.as_mut());
    }
    engine.flush(sink.as_mut());
}
