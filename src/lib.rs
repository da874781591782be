//! Beat-synchronous MIDI note effects
//!
//! Incoming notes pass through a shared note tracker and then one of the
//! effects in [`fx`]: a pulse repeater, an accelerating or random echo, or
//! a monophonizer. The host side is abstracted by [`midi::MidiHost`] and
//! [`transport::TransportInfo`], which lets the same effects run offline
//! over MIDI files ([`replay`]) or live between devices ([`midi::player`]).

pub mod config;
pub mod fx;
pub mod midi;
pub mod replay;
pub mod transport;
