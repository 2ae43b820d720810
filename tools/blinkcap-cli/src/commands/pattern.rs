//! Print the tick schedule for a pattern.

use std::time::Duration;

use blinkcap_common::config::AppConfig;
use blinkcap_common::pattern::PatternClock;

pub fn run(pattern: Option<String>, duration_ms: Option<u64>) -> anyhow::Result<()> {
    let defaults = AppConfig::load().capture;
    let pattern = pattern.unwrap_or(defaults.pattern);
    let total = Duration::from_millis(duration_ms.unwrap_or(defaults.total_duration_ms));

    let clock = PatternClock::new(&pattern, total)?;

    println!("Pattern: {pattern}");
    println!(
        "Steps: {}, step interval: {} ms",
        clock.len(),
        clock.step_interval().as_millis()
    );
    println!();
    println!("{:>4}  {:>8}  {:>6}  {}", "tick", "t (ms)", "signal", "frame");

    for tick in 0..clock.len() {
        let offset_ms = clock.step_interval().as_millis() as u64 * tick as u64;
        let signal = if clock.symbol_at(tick).is_high() {
            "white"
        } else {
            "black"
        };
        let frame = if clock.is_keyframe(tick) { "key" } else { "delta" };
        println!("{tick:>4}  {offset_ms:>8}  {signal:>6}  {frame}");
    }
    Ok(())
}
