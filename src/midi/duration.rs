//! Symbolic note lengths and their beat values
//!
//! A quarter note is one beat. Lengths are chosen from a fixed menu
//! and may be straight, triplet or dotted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Base note value, as a fraction of a whole note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteValue {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl NoteValue {
    /// Fraction of a whole note
    pub fn fraction(self) -> f64 {
        match self {
            Self::Whole => 1.0,
            Self::Half => 1.0 / 2.0,
            Self::Quarter => 1.0 / 4.0,
            Self::Eighth => 1.0 / 8.0,
            Self::Sixteenth => 1.0 / 16.0,
            Self::ThirtySecond => 1.0 / 32.0,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Whole => "1",
            Self::Half => "1/2",
            Self::Quarter => "1/4",
            Self::Eighth => "1/8",
            Self::Sixteenth => "1/16",
            Self::ThirtySecond => "1/32",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "1" | "1/1" | "whole" => Some(Self::Whole),
            "1/2" | "half" => Some(Self::Half),
            "1/4" | "quarter" => Some(Self::Quarter),
            "1/8" | "eighth" => Some(Self::Eighth),
            "1/16" | "sixteenth" => Some(Self::Sixteenth),
            "1/32" | "thirty-second" | "thirtysecond" => Some(Self::ThirtySecond),
            _ => None,
        }
    }
}

/// Rhythmic modifier applied to a note value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feel {
    Straight,
    /// Three in the space of two (x 2/3)
    Triplet,
    /// Half again as long (x 1.5)
    Dotted,
}

/// A symbolic note length such as "1/8 T" or "quarter dotted"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteLength {
    pub value: NoteValue,
    pub feel: Feel,
}

impl NoteLength {
    pub const fn new(value: NoteValue, feel: Feel) -> Self {
        Self { value, feel }
    }

    pub const fn straight(value: NoteValue) -> Self {
        Self::new(value, Feel::Straight)
    }

    /// Length in beats
    pub fn to_beats(self) -> f64 {
        let straight = self.value.fraction() * 4.0;
        match self.feel {
            Feel::Straight => straight,
            Feel::Dotted => straight * 1.5,
            Feel::Triplet => straight * (2.0 / 3.0),
        }
    }

    /// Look up a length by its position in `NOTE_LENGTHS`
    pub fn from_index(index: usize) -> Option<Self> {
        NOTE_LENGTHS.get(index).copied()
    }
}

impl fmt::Display for NoteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.feel {
            Feel::Straight => write!(f, "{}", self.value.symbol()),
            Feel::Triplet => write!(f, "{} T", self.value.symbol()),
            Feel::Dotted => write!(f, "{} .", self.value.symbol()),
        }
    }
}

impl FromStr for NoteLength {
    type Err = String;

    /// Accepts menu symbols ("1/8", "1/8 T", "1/8 .") and names
    /// ("eighth", "eighth triplet", "eighth dotted")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let mut parts = lower.split_whitespace();

        let value = parts
            .next()
            .and_then(NoteValue::parse)
            .ok_or_else(|| format!("Unknown note length: {:?}", s))?;

        let feel = match parts.next() {
            None => Feel::Straight,
            Some("t" | "triplet") => Feel::Triplet,
            Some("." | "dotted") => Feel::Dotted,
            Some(other) => return Err(format!("Unknown note length modifier: {:?}", other)),
        };

        if parts.next().is_some() {
            return Err(format!("Note length takes at most one modifier: {:?}", s));
        }

        Ok(Self::new(value, feel))
    }
}

impl TryFrom<String> for NoteLength {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NoteLength> for String {
    fn from(length: NoteLength) -> Self {
        length.to_string()
    }
}

// =============================================================================
// LENGTH MENUS
// =============================================================================

const fn entry(value: NoteValue, feel: Feel) -> NoteLength {
    NoteLength::new(value, feel)
}

/// All selectable note lengths, grouped from shortest note value to longest
pub const NOTE_LENGTHS: &[NoteLength] = &[
    entry(NoteValue::ThirtySecond, Feel::Triplet),
    entry(NoteValue::ThirtySecond, Feel::Straight),
    entry(NoteValue::ThirtySecond, Feel::Dotted),
    entry(NoteValue::Sixteenth, Feel::Triplet),
    entry(NoteValue::Sixteenth, Feel::Straight),
    entry(NoteValue::Sixteenth, Feel::Dotted),
    entry(NoteValue::Eighth, Feel::Triplet),
    entry(NoteValue::Eighth, Feel::Straight),
    entry(NoteValue::Eighth, Feel::Dotted),
    entry(NoteValue::Quarter, Feel::Triplet),
    entry(NoteValue::Quarter, Feel::Straight),
    entry(NoteValue::Quarter, Feel::Dotted),
    entry(NoteValue::Half, Feel::Triplet),
    entry(NoteValue::Half, Feel::Straight),
    entry(NoteValue::Half, Feel::Dotted),
    entry(NoteValue::Whole, Feel::Straight),
];

/// Pulse lengths the repeater offers (up to a quarter note)
pub const PULSE_LENGTHS: &[NoteLength] = NOTE_LENGTHS.split_at(11).0;

/// A note length menu entry that can also be switched off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LengthSelector {
    #[default]
    Off,
    Length(NoteLength),
}

impl LengthSelector {
    /// Length in beats, or `None` when the selector is off
    pub fn to_beats(self) -> Option<f64> {
        match self {
            Self::Off => None,
            Self::Length(length) => Some(length.to_beats()),
        }
    }

    /// Menu index where 0 is "off" and the rest follow `NOTE_LENGTHS`
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            n => NoteLength::from_index(n - 1).map(Self::Length),
        }
    }
}

impl fmt::Display for LengthSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::Length(length) => fmt::Display::fmt(length, f),
        }
    }
}

impl FromStr for LengthSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("off") {
            Ok(Self::Off)
        } else {
            s.parse().map(Self::Length)
        }
    }
}

impl TryFrom<String> for LengthSelector {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LengthSelector> for String {
    fn from(selector: LengthSelector) -> Self {
        selector.to_string()
    }
}

/// Tolerance, in grid steps, for beats that land on a grid line after rounding
const GRID_EPSILON: f64 = 1e-9;

/// Smallest multiple of `grid` at or after `current`
///
/// A beat within `GRID_EPSILON` steps past a grid line counts as on it, so
/// accumulated triplet arithmetic does not skip a slot.
/// A non-positive grid has no multiples; `current` is returned unchanged.
pub fn next_quantized_beat(current: f64, grid: f64) -> f64 {
    if grid <= 0.0 || !grid.is_finite() {
        return current;
    }
    ((current / grid) - GRID_EPSILON).ceil() * grid
}
