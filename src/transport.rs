//! Host transport state and an offline block clock
//!
//! `TransportInfo` is what an effect sees once per audio block. `Timeline`
//! produces those blocks for offline rendering, optionally looping a cycle
//! region a fixed number of times.

/// Transport snapshot for one block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportInfo {
    pub playing: bool,
    /// First beat of the block
    pub block_start: f64,
    /// Beat just past the end of the block
    pub block_end: f64,
    /// Whether the cycle (loop) region is active
    pub cycling: bool,
    pub cycle_left: f64,
    pub cycle_right: f64,
}

impl TransportInfo {
    /// A playing block without a cycle region
    pub fn playing(block_start: f64, block_end: f64) -> Self {
        Self {
            playing: true,
            block_start,
            block_end,
            ..Default::default()
        }
    }

    /// A stopped block positioned at `beat`
    pub fn stopped(beat: f64) -> Self {
        Self {
            playing: false,
            block_start: beat,
            block_end: beat,
            ..Default::default()
        }
    }

    /// Enable the cycle region on this block
    pub fn with_cycle(mut self, left: f64, right: f64) -> Self {
        self.cycling = true;
        self.cycle_left = left;
        self.cycle_right = right;
        self
    }
}

/// A cycle region played a fixed number of times
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cycle {
    pub left: f64,
    pub right: f64,
    /// Times the region plays before the transport moves past it
    pub passes: u32,
}

/// Offline block clock
///
/// Yields playing blocks of `block_beats` from 0 up to `end`. Blocks never
/// straddle the cycle's right edge; when a pass ends the position jumps back
/// to the left edge, which the effects see as a backward discontinuity.
pub struct Timeline {
    position: f64,
    end: f64,
    block_beats: f64,
    cycle: Option<Cycle>,
    passes_done: u32,
    /// Linear (unlooped) beats elapsed before the current block
    elapsed: f64,
}

/// One block from the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Block {
    pub transport: TransportInfo,
    /// Linear beat of `transport.block_start`, counting every pass
    pub linear_start: f64,
}

impl Timeline {
    pub fn new(end: f64, block_beats: f64, cycle: Option<Cycle>) -> Self {
        let cycle = cycle.filter(|c| {
            let valid = c.right > c.left && c.left >= 0.0 && c.passes > 0;
            if !valid {
                log::warn!("Ignoring invalid cycle region {:?}", c);
            }
            valid
        });

        Self {
            position: 0.0,
            end: end.max(0.0),
            block_beats: if block_beats > 0.0 { block_beats } else { 0.25 },
            cycle,
            passes_done: 0,
            elapsed: 0.0,
        }
    }

    fn active_cycle(&self) -> Option<Cycle> {
        self.cycle.filter(|c| self.passes_done < c.passes)
    }
}

impl Iterator for Timeline {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let cycle = self.active_cycle();

        if let Some(c) = cycle {
            if self.position >= c.right {
                self.passes_done += 1;
                if self.passes_done < c.passes {
                    log::debug!("Cycle pass {} -> jump to beat {}", self.passes_done, c.left);
                    self.position = c.left;
                }
            }
        }

        // After the final pass the song continues to its end
        let cycle = self.active_cycle();
        let limit = match cycle {
            Some(c) if self.position < c.right => c.right,
            _ => self.end,
        };

        if self.position >= limit {
            return None;
        }

        let start = self.position;
        let end = (start + self.block_beats).min(limit);
        let mut transport = TransportInfo::playing(start, end);
        if let Some(c) = cycle {
            transport = transport.with_cycle(c.left, c.right);
        }

        let block = Block {
            transport,
            linear_start: self.elapsed,
        };

        self.position = end;
        self.elapsed += end - start;
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_blocks() {
        let blocks: Vec<Block> = Timeline::new(1.0, 0.25, None).collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].transport.block_start, 0.0);
        assert_eq!(blocks[3].transport.block_end, 1.0);
        assert!(blocks.iter().all(|b| b.transport.playing && !b.transport.cycling));
    }

    #[test]
    fn test_cycle_jumps_back() {
        let cycle = Cycle {
            left: 1.0,
            right: 2.0,
            passes: 2,
        };
        let starts: Vec<(f64, f64)> = Timeline::new(3.0, 0.5, Some(cycle))
            .map(|b| (b.transport.block_start, b.linear_start))
            .collect();

        assert_eq!(
            starts,
            [
                (0.0, 0.0),
                (0.5, 0.5),
                (1.0, 1.0),
                (1.5, 1.5),
                // Second pass
                (1.0, 2.0),
                (1.5, 2.5),
                // Past the cycle
                (2.0, 3.0),
                (2.5, 3.5),
            ]
        );
    }

    #[test]
    fn test_cycle_flag_only_while_looping() {
        let cycle = Cycle {
            left: 0.0,
            right: 1.0,
            passes: 1,
        };
        let blocks: Vec<Block> = Timeline::new(2.0, 0.5, Some(cycle)).collect();
        assert!(blocks[0].transport.cycling);
        assert!(blocks[1].transport.cycling);
        assert!(!blocks[2].transport.cycling);
    }

    #[test]
    fn test_invalid_cycle_ignored() {
        let cycle = Cycle {
            left: 2.0,
            right: 1.0,
            passes: 3,
        };
        assert_eq!(Timeline::new(1.0, 0.5, Some(cycle)).count(), 2);
    }
}
