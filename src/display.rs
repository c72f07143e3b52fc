//! Boot animation and live clock rendering.
//!
//! The engine is a tick function over [`DisplayPhase`]; the scheduler calls
//! [`DisplayEngine::tick`] every few milliseconds and the engine layers the
//! 80 ms animation cadence and 500 ms blink cadence on top.

use std::sync::Arc;

use log::info;

use crate::clock::WallClock;
use crate::debug_flags::{self, DEBUG_DISPLAY};
use crate::error::RenderError;
use crate::hal::{Rtc, SegmentDisplay};
use crate::state::{ClockState, DisplayPhase};

pub const ANIMATION_INTERVAL_MS: u64 = 80;
pub const SETTLE_MS: u64 = 200;
pub const BLINK_INTERVAL_MS: u64 = 500;

/// Seven-segment patterns for 0-9 (bit 0 = a ... bit 6 = g).
pub const DIGITS: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

/// One lit segment chasing around the digit outline: a, b, c, d, e, f.
pub const LOADING_FRAMES: [u8; 6] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20];

/// `HH` `MM` as four digit glyphs.
pub fn clock_glyphs(time: &WallClock) -> [u8; 4] {
    let h = time.hour % 24;
    let m = time.minute % 60;
    [
        DIGITS[(h / 10) as usize],
        DIGITS[(h % 10) as usize],
        DIGITS[(m / 10) as usize],
        DIGITS[(m % 10) as usize],
    ]
}

pub struct DisplayEngine<R, D> {
    state: Arc<ClockState<R, D>>,
    next_due_ms: u64,
}

impl<R: Rtc, D: SegmentDisplay> DisplayEngine<R, D> {
    pub fn new(state: Arc<ClockState<R, D>>) -> Self {
        DisplayEngine { state, next_due_ms: 0 }
    }

    /// Advance to `now_ms`. Does nothing until the current cadence is due.
    ///
    /// An error means one frame was dropped; the phase still advanced and
    /// the next tick carries on.
    pub fn tick(&mut self, now_ms: u64) -> Result<(), RenderError> {
        if now_ms < self.next_due_ms {
            return Ok(());
        }
        match self.state.phase() {
            DisplayPhase::Loading => self.tick_loading(now_ms),
            DisplayPhase::Settling { until_ms } if now_ms < until_ms => {
                self.next_due_ms = until_ms;
                Ok(())
            }
            DisplayPhase::Settling { .. } => {
                self.state.with_display(|d| d.phase = DisplayPhase::Running);
                info!("Display running");
                self.tick_running(now_ms)
            }
            DisplayPhase::Running => self.tick_running(now_ms),
        }
    }

    fn tick_loading(&mut self, now_ms: u64) -> Result<(), RenderError> {
        if self.state.is_time_ready() {
            let until_ms = now_ms + SETTLE_MS;
            self.next_due_ms = until_ms;
            info!("Time ready; leaving boot animation");
            return self.state.with_display(|d| {
                d.phase = DisplayPhase::Settling { until_ms };
                d.display.clear().map_err(RenderError::Display)
            });
        }

        self.next_due_ms = now_ms + ANIMATION_INTERVAL_MS;
        self.state.with_display(|d| {
            let glyph = LOADING_FRAMES[d.frame as usize % LOADING_FRAMES.len()];
            d.frame = ((d.frame as usize + 1) % LOADING_FRAMES.len()) as u8;
            d.display.render(&[glyph; 4], false).map_err(RenderError::Display)
        })
    }

    fn tick_running(&mut self, now_ms: u64) -> Result<(), RenderError> {
        self.next_due_ms = now_ms + BLINK_INTERVAL_MS;
        let time = self
            .state
            .with_time(|t| t.rtc.read())
            .map_err(RenderError::ClockRead)?;
        let glyphs = clock_glyphs(&time);
        self.state.with_display(|d| {
            d.colon_on = !d.colon_on;
            if debug_flags::is_on(&DEBUG_DISPLAY) {
                info!("Display {} colon={}", time, d.colon_on);
            }
            d.display.render(&glyphs, d.colon_on).map_err(RenderError::Display)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::{FakeRtc, RecordingDisplay};

    const TICK_MS: u64 = 10;

    struct Rig {
        rtc: FakeRtc,
        display: RecordingDisplay,
        state: Arc<ClockState<FakeRtc, RecordingDisplay>>,
        engine: DisplayEngine<FakeRtc, RecordingDisplay>,
    }

    fn rig() -> Rig {
        let rtc = FakeRtc::at(WallClock { year: 2024, month: 3, day: 9, hour: 7, minute: 5, second: 0 });
        let display = RecordingDisplay::default();
        let state = Arc::new(ClockState::new(rtc.clone(), display.clone()));
        let engine = DisplayEngine::new(Arc::clone(&state));
        Rig { rtc, display, state, engine }
    }

    /// Tick every 10 ms over [from, to), asserting no frame errors.
    fn run(r: &mut Rig, from: u64, to: u64) {
        let mut t = from;
        while t < to {
            r.engine.tick(t).unwrap();
            t += TICK_MS;
        }
    }

    #[test]
    fn digit_glyphs_are_zero_padded() {
        let wc = WallClock { year: 2024, month: 1, day: 1, hour: 7, minute: 5, second: 0 };
        assert_eq!(clock_glyphs(&wc), [DIGITS[0], DIGITS[7], DIGITS[0], DIGITS[5]]);
        let wc = WallClock { hour: 23, minute: 59, ..wc };
        assert_eq!(clock_glyphs(&wc), [DIGITS[2], DIGITS[3], DIGITS[5], DIGITS[9]]);
    }

    #[test]
    fn glyphs_agree_with_hms_on_out_of_range_fields() {
        let wc = WallClock { year: 2024, month: 1, day: 1, hour: 123, minute: 75, second: 99 };
        let hms = wc.hms();
        let digits: Vec<u8> = hms
            .bytes()
            .take(5)
            .filter(u8::is_ascii_digit)
            .map(|b| DIGITS[(b - b'0') as usize])
            .collect();
        assert_eq!(clock_glyphs(&wc).to_vec(), digits);
    }

    #[test]
    fn stays_loading_while_time_not_ready() {
        let mut r = rig();
        run(&mut r, 0, 2_000);
        assert_eq!(r.state.phase(), DisplayPhase::Loading);

        let frames = r.display.frames();
        assert_eq!(frames.len(), 25); // 2000 ms / 80 ms
        for (i, (glyphs, colon)) in frames.iter().enumerate() {
            let g = LOADING_FRAMES[i % LOADING_FRAMES.len()];
            assert_eq!(*glyphs, [g; 4]);
            assert!(!colon);
        }
    }

    #[test]
    fn handoff_clears_settles_then_runs() {
        let mut r = rig();
        run(&mut r, 0, 400);
        let animated = r.display.frames().len();

        r.state.with_time(|t| t.time_ready = true);
        // Next animation tick is at 400 ms.
        r.engine.tick(400).unwrap();
        assert_eq!(r.state.phase(), DisplayPhase::Settling { until_ms: 600 });
        assert_eq!(r.display.clears(), 1);

        run(&mut r, 410, 600);
        assert_eq!(r.display.frames().len(), animated);

        r.engine.tick(600).unwrap();
        assert_eq!(r.state.phase(), DisplayPhase::Running);
        let frames = r.display.frames();
        assert_eq!(frames.last().unwrap().0, [DIGITS[0], DIGITS[7], DIGITS[0], DIGITS[5]]);
    }

    #[test]
    fn running_never_returns_to_loading() {
        let mut r = rig();
        r.state.with_time(|t| t.time_ready = true);
        run(&mut r, 0, 1_000);
        assert_eq!(r.state.phase(), DisplayPhase::Running);

        r.state.with_time(|t| t.time_ready = false);
        run(&mut r, 1_000, 3_000);
        assert_eq!(r.state.phase(), DisplayPhase::Running);
        assert_eq!(r.display.clears(), 1);
    }

    #[test]
    fn colon_blinks_at_one_hertz() {
        let mut r = rig();
        r.state.with_time(|t| t.time_ready = true);
        run(&mut r, 0, 210);
        assert_eq!(r.state.phase(), DisplayPhase::Running);
        let before = r.display.frames().len();

        run(&mut r, 210, 5_210);
        let frames = r.display.frames();
        let window = &frames[before - 1..];
        let changes = window.windows(2).filter(|w| w[0].1 != w[1].1).count();
        assert_eq!(changes, 10);
    }

    #[test]
    fn clock_follows_rtc() {
        let mut r = rig();
        r.state.with_time(|t| t.time_ready = true);
        run(&mut r, 0, 300);
        r.rtc.state().now = Some(WallClock { year: 2024, month: 3, day: 9, hour: 18, minute: 42, second: 0 });
        run(&mut r, 300, 1_000);
        let last = r.display.frames().last().unwrap().0;
        assert_eq!(last, [DIGITS[1], DIGITS[8], DIGITS[4], DIGITS[2]]);
    }

    #[test]
    fn render_failure_drops_one_frame_and_continues() {
        let mut r = rig();
        r.state.with_time(|t| t.time_ready = true);
        run(&mut r, 0, 300);
        let before = r.display.frames().len();

        r.display.set_failing(true);
        assert!(matches!(r.engine.tick(700), Err(RenderError::Display(_))));
        r.display.set_failing(false);

        // Nothing due until 1200 ms, then rendering resumes.
        run(&mut r, 710, 1_300);
        assert_eq!(r.display.frames().len(), before + 1);
        assert_eq!(r.state.phase(), DisplayPhase::Running);
    }

    #[test]
    fn rtc_read_failure_is_reported() {
        let mut r = rig();
        r.state.with_time(|t| t.time_ready = true);
        run(&mut r, 0, 300);
        r.rtc.state().fail_reads = true;
        assert!(matches!(r.engine.tick(700), Err(RenderError::ClockRead(_))));
        r.rtc.state().fail_reads = false;
        r.engine.tick(1_200).unwrap();
    }
}
