//! MIDI device input and output
//!
//! Enumerates hardware and virtual ports, feeds a connected input into an
//! `InputQueue`, and sends processed messages to an output port.

use std::sync::Arc;

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use super::events::{InputQueue, MidiEvent};

const CLIENT_NAME: &str = "notefx";

/// Information about a MIDI port
#[derive(Debug, Clone)]
pub struct MidiDeviceInfo {
    /// Port index (for connection)
    pub index: usize,
    /// Port name
    pub name: String,
}

/// List available MIDI input ports
pub fn list_inputs() -> Result<Vec<MidiDeviceInfo>, String> {
    let midi_in = MidiInput::new("notefx-enumerate")
        .map_err(|e| format!("Failed to create MIDI input: {}", e))?;

    Ok(midi_in
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| MidiDeviceInfo {
            index,
            name: midi_in
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index)),
        })
        .collect())
}

/// List available MIDI output ports
pub fn list_outputs() -> Result<Vec<MidiDeviceInfo>, String> {
    let midi_out = MidiOutput::new("notefx-enumerate")
        .map_err(|e| format!("Failed to create MIDI output: {}", e))?;

    Ok(midi_out
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| MidiDeviceInfo {
            index,
            name: midi_out
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index)),
        })
        .collect())
}

/// Open input connection; closes the port when dropped
pub struct InputDevice {
    _connection: MidiInputConnection<()>,
    name: String,
}

impl InputDevice {
    /// Connect to an input port by index, forwarding decoded messages to `queue`
    pub fn connect(index: usize, queue: Arc<InputQueue>) -> Result<Self, String> {
        let midi_in =
            MidiInput::new(CLIENT_NAME).map_err(|e| format!("Failed to create MIDI input: {}", e))?;

        let ports = midi_in.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| format!("Input device index {} not found", index))?;
        let name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {}", index));

        log::info!("Connecting to MIDI input: {}", name);

        let connection = midi_in
            .connect(
                port,
                "notefx-in",
                move |_timestamp, message, _| handle_input_message(message, &queue),
                (),
            )
            .map_err(|e| format!("Failed to connect to MIDI input: {}", e))?;

        Ok(Self {
            _connection: connection,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Decode one raw message from the device callback
fn handle_input_message(message: &[u8], queue: &InputQueue) {
    match MidiEvent::from_bytes(message) {
        Some(event) => {
            log::trace!("MIDI in: {:?}", event);
            if !queue.push(event) {
                log::debug!("MIDI input queue busy, dropped {:?}", event);
            }
        }
        None => log::trace!(
            "Ignoring MIDI message: status=0x{:02X}, len={}",
            message.first().copied().unwrap_or(0),
            message.len()
        ),
    }
}

/// Open output connection
pub struct OutputDevice {
    connection: MidiOutputConnection,
    name: String,
}

impl OutputDevice {
    /// Connect to an output port by index
    pub fn connect(index: usize) -> Result<Self, String> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| format!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| format!("Output device index {} not found", index))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {}", index));

        log::info!("Connecting to MIDI output: {}", name);

        let connection = midi_out
            .connect(port, "notefx-out")
            .map_err(|e| format!("Failed to connect to MIDI output: {}", e))?;

        Ok(Self { connection, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one message; a panic goes out on all 16 channels
    pub fn send(&mut self, event: MidiEvent) -> Result<(), String> {
        match event {
            MidiEvent::AllNotesOff => {
                for channel in 0..16u8 {
                    let mut bytes = event.to_bytes();
                    bytes[0] |= channel;
                    self.send_bytes(&bytes)?;
                }
                Ok(())
            }
            _ => self.send_bytes(&event.to_bytes()),
        }
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.connection
            .send(bytes)
            .map_err(|e| format!("Failed to send MIDI to {}: {}", self.name, e))
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        // Leave nothing hanging on the synth
        if let Err(e) = self.send(MidiEvent::AllNotesOff) {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_messages_reach_queue() {
        let queue = InputQueue::new(8);
        handle_input_message(&[0x90, 60, 100], &queue);
        handle_input_message(&[0x90, 60, 0], &queue);
        handle_input_message(&[0xF8], &queue);
        handle_input_message(&[], &queue);

        let mut buffer = Vec::new();
        assert_eq!(queue.drain_into(&mut buffer), 2);
        assert_eq!(buffer[0], MidiEvent::note_on(60, 100, 0));
        assert!(matches!(buffer[1], MidiEvent::NoteOff { note: 60, .. }));
    }
}
