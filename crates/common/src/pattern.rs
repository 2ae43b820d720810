//! The pattern clock: fixed bit sequence and per-step timing.
//!
//! A capture session displays a binary pattern as alternating
//! full-screen colors, one symbol per scheduler tick. The pattern
//! clock is pure data + arithmetic: it knows the symbol for each tick,
//! the tick period, and which ticks fall on a keyframe boundary.
//!
//! Keyframe policy: tick 0 is always a keyframe; tick i > 0 is a
//! keyframe iff the symbol differs from the previous tick's. Every
//! signal transition therefore starts a self-contained decodable unit,
//! which is what lets reconstruction recover an image at every
//! transition boundary without inter-unit state.

use std::time::Duration;

use crate::error::{BlinkcapError, BlinkcapResult};

/// Default pattern: 20 symbols alternating in pairs.
pub const DEFAULT_PATTERN: &str = "00110011001100110011";

/// Default total session duration (10 s over 20 symbols = 500 ms/step).
pub const DEFAULT_TOTAL_DURATION: Duration = Duration::from_secs(10);

/// One binary symbol of the signaling pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// `0` — dark signal.
    Low,
    /// `1` — bright signal.
    High,
}

impl Symbol {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Low),
            '1' => Some(Self::High),
            _ => None,
        }
    }

    /// Whether this is the bright (`1`) symbol.
    pub fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Immutable per-session pattern timing.
#[derive(Debug, Clone)]
pub struct PatternClock {
    symbols: Vec<Symbol>,
    step_interval: Duration,
}

impl PatternClock {
    /// Build a clock from a `0`/`1` pattern string and a total session
    /// duration. The step interval is `total / len`.
    pub fn new(pattern: &str, total_duration: Duration) -> BlinkcapResult<Self> {
        if pattern.is_empty() {
            return Err(BlinkcapError::configuration("Pattern must not be empty"));
        }
        let symbols = pattern
            .chars()
            .map(|c| {
                Symbol::from_char(c).ok_or_else(|| {
                    BlinkcapError::configuration(format!(
                        "Pattern may only contain '0' and '1', found {c:?}"
                    ))
                })
            })
            .collect::<BlinkcapResult<Vec<_>>>()?;
        if total_duration.is_zero() {
            return Err(BlinkcapError::configuration(
                "Total duration must be positive",
            ));
        }

        let step_interval = total_duration / symbols.len() as u32;
        Ok(Self {
            symbols,
            step_interval,
        })
    }

    /// The default 20-step, 10-second clock.
    pub fn standard() -> Self {
        // The defaults are statically valid.
        Self::new(DEFAULT_PATTERN, DEFAULT_TOTAL_DURATION)
            .unwrap_or_else(|_| unreachable!("default pattern is valid"))
    }

    /// Number of ticks N in the session.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Period between scheduler firings.
    pub fn step_interval(&self) -> Duration {
        self.step_interval
    }

    /// Symbol displayed at the given tick. Panics if out of range;
    /// the scheduler never advances past N.
    pub fn symbol_at(&self, tick: usize) -> Symbol {
        self.symbols[tick]
    }

    /// Keyframe policy: tick 0, and every signal transition.
    pub fn is_keyframe(&self, tick: usize) -> bool {
        tick == 0 || self.symbols[tick] != self.symbols[tick - 1]
    }
}
