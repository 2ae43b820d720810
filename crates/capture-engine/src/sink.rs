//! Display sinks for the visual signal.
//!
//! The scheduler flips the signal once per tick; the sink renders it.
//! `reset` returns the display to a neutral state and is part of
//! session teardown.

use std::io::Write;

use blinkcap_common::error::BlinkcapResult;
use blinkcap_common::pattern::Symbol;

/// Abstract display capability consumed by the capture scheduler.
pub trait SignalSink: Send {
    /// Render the signal for the current tick.
    fn set_signal(&mut self, symbol: Symbol) -> BlinkcapResult<()>;

    /// Return the display to neutral. Idempotent.
    fn reset(&mut self);
}

/// Full-terminal signal sink: fills the screen black for `0` and white
/// for `1` using ANSI escapes. The terminal analog of flipping the
/// page background color.
pub struct AnsiSignalSink<W: Write + Send> {
    out: W,
}

impl AnsiSignalSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> AnsiSignalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> SignalSink for AnsiSignalSink<W> {
    fn set_signal(&mut self, symbol: Symbol) -> BlinkcapResult<()> {
        // 48;5;N sets the background; 2J repaints the whole screen with it.
        let code: &[u8] = if symbol.is_high() {
            b"\x1b[48;5;15m\x1b[2J"
        } else {
            b"\x1b[48;5;0m\x1b[2J"
        };
        self.out.write_all(code)?;
        self.out.flush()?;
        Ok(())
    }

    fn reset(&mut self) {
        let _ = self.out.write_all(b"\x1b[0m\x1b[2J\x1b[H");
        let _ = self.out.flush();
    }
}
