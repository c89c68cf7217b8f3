//! Completion detection over the terminal stream.
//!
//! There is no structured signal for "the command is done"; the stream is
//! raw terminal bytes. The heuristic here combines a quiet period with the
//! shape of the line under the cursor: after two seconds without output, if
//! that line ends in something prompt-like, the session is considered idle.
//! Detection is edge-triggered, so one burst of work yields at most one idle
//! report once the stream settles.

use std::time::{Duration, Instant};

use regex::Regex;

/// How long the stream must stay quiet before the prompt check runs.
pub const IDLE_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Watches terminal output and reports the working -> idle transition.
///
/// All timing flows through explicit [`Instant`] arguments so the heuristic
/// can be tested without sleeping.
pub struct IdleMonitor {
    parser: vt100::Parser,
    last_output: Option<Instant>,
    working: bool,
    prompt_patterns: Vec<Regex>,
}

impl IdleMonitor {
    /// Creates a monitor rendering at the given terminal geometry.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: vt100::Parser::new(rows, cols, 0),
            last_output: None,
            working: false,
            // Common interactive prompt tails: `$`, `%`, `#`, `>`, `❯`,
            // optionally followed by trailing whitespace.
            prompt_patterns: vec![Regex::new(r"[$%#>❯]\s*$").expect("prompt regex")],
        }
    }

    /// Tracks a geometry change so line wrapping matches the real terminal.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.set_size(rows, cols);
    }

    /// Feeds a chunk of output into the virtual terminal.
    ///
    /// Any output means the session is working again; a later quiet period
    /// can re-arm an idle report.
    pub fn note_output(&mut self, data: &[u8], now: Instant) {
        self.parser.process(data);
        self.last_output = Some(now);
        self.working = true;
    }

    /// Checks for the idle transition. Returns `true` at most once per burst
    /// of output.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.working {
            return false;
        }
        let Some(last) = self.last_output else {
            return false;
        };
        if now.duration_since(last) < IDLE_QUIET_PERIOD {
            return false;
        }
        if self.cursor_line_is_prompt() {
            self.working = false;
            return true;
        }
        false
    }

    fn cursor_line_is_prompt(&self) -> bool {
        let screen = self.parser.screen();
        let (row, _) = screen.cursor_position();
        let (_, cols) = screen.size();

        let mut line = String::new();
        for col in 0..cols {
            if let Some(cell) = screen.cell(row, col) {
                line.push_str(&cell.contents());
            }
        }
        let line = line.trim_end();
        if line.is_empty() {
            return false;
        }
        self.prompt_patterns.iter().any(|re| re.is_match(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn after(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_no_output_never_idle() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();
        assert!(!monitor.poll(after(t0, 10_000)));
    }

    #[test]
    fn test_idle_after_quiet_period_on_prompt() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();

        monitor.note_output(b"build ok\r\n$ ", t0);
        // Still inside the quiet window.
        assert!(!monitor.poll(after(t0, 1_000)));
        assert!(monitor.poll(after(t0, 2_500)));
    }

    #[test]
    fn test_idle_reported_only_once() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();

        monitor.note_output(b"$ ", t0);
        assert!(monitor.poll(after(t0, 3_000)));
        assert!(!monitor.poll(after(t0, 4_000)));
        assert!(!monitor.poll(after(t0, 60_000)));
    }

    #[test]
    fn test_non_prompt_cursor_line_is_not_idle() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();

        // Cursor sits after in-progress output with no prompt shape.
        monitor.note_output(b"compiling unit 3 of 17...", t0);
        assert!(!monitor.poll(after(t0, 5_000)));
    }

    #[test]
    fn test_new_output_rearms_detection() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();

        monitor.note_output(b"$ ", t0);
        assert!(monitor.poll(after(t0, 3_000)));

        // More work, then quiet at a prompt again.
        monitor.note_output(b"\r\nrunning tests\r\n", after(t0, 4_000));
        assert!(!monitor.poll(after(t0, 7_000)));
        monitor.note_output(b"$ ", after(t0, 8_000));
        assert!(monitor.poll(after(t0, 10_500)));
    }

    #[test]
    fn test_unicode_prompt_recognized() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();

        monitor.note_output("done\r\n❯ ".as_bytes(), t0);
        assert!(monitor.poll(after(t0, 2_500)));
    }

    #[test]
    fn test_output_during_quiet_window_restarts_it() {
        let mut monitor = IdleMonitor::new(80, 24);
        let t0 = Instant::now();

        monitor.note_output(b"$ ", t0);
        monitor.note_output(b"", after(t0, 1_500));
        // The window restarts from the second chunk.
        assert!(!monitor.poll(after(t0, 2_500)));
        assert!(monitor.poll(after(t0, 4_000)));
    }
}
