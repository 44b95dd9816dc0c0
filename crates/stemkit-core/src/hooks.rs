//! Progress and cancellation hooks handed to stages and external engines

/// Progress sink taking a fraction in 0.0..=1.0
pub type ProgressSink<'a> = &'a dyn Fn(f64);

/// Cancellation predicate, sampled by stages at their own checkpoints
pub type CancelCheck<'a> = &'a dyn Fn() -> bool;

/// Progress sink that discards updates
#[cfg(test)]
pub fn no_progress(_: f64) {}

/// Cancellation predicate that never cancels
#[cfg(test)]
pub fn never_cancel() -> bool {
    false
}
