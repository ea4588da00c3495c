//! Stage timing helpers.
use std::time::{Duration, Instant};

use tracing::info;

/// Human-readable elapsed time: `4.20s`, `2min and 5s` or `1h, 3min and 7s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        return format!("{:.2}s", secs);
    }
    let total = secs.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h == 0 {
        format!("{}min and {}s", m, s)
    } else {
        format!("{}h, {}min and {}s", h, m, s)
    }
}

/// Run `f` and log how long `stage` took.
pub fn timed<T>(stage: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    info!("{} finished in {}", stage, format_elapsed(start.elapsed()));
    out
}
