use std::sync::atomic::{AtomicBool, Ordering};

/// Global debug flags toggled via console.
/// When a flag is on, its module logs per-event detail at info! level
/// instead of being silent.
pub static DEBUG_SYNC: AtomicBool = AtomicBool::new(false);
pub static DEBUG_DISPLAY: AtomicBool = AtomicBool::new(false);
pub static DEBUG_HTTP: AtomicBool = AtomicBool::new(false);

pub fn is_on(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

pub fn set(flag: &AtomicBool, val: bool) {
    flag.store(val, Ordering::Relaxed);
}

pub fn toggle(flag: &AtomicBool) -> bool {
    !flag.fetch_xor(true, Ordering::Relaxed)
}

pub fn status_line() -> String {
    let show = |flag: &AtomicBool| if is_on(flag) { "ON" } else { "off" };
    format!(
        "sync={} display={} http={}",
        show(&DEBUG_SYNC),
        show(&DEBUG_DISPLAY),
        show(&DEBUG_HTTP),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Console tests toggle the real flags, so this one uses its own.
    #[test]
    fn toggle_flips_and_reports_new_state() {
        let flag = AtomicBool::new(false);
        assert!(toggle(&flag));
        assert!(is_on(&flag));
        assert!(!toggle(&flag));
        set(&flag, true);
        assert!(is_on(&flag));
    }

    #[test]
    fn status_line_names_every_flag() {
        let line = status_line();
        for name in ["sync=", "display=", "http="] {
            assert!(line.contains(name), "{}", line);
        }
    }
}
