//! Structured diagnostics for the decode/encode loops.
//!
//! The flow-control loops make many small decisions (flip, deliver, pause) that are
//! invisible from the outside. `log_metric!` emits them as one structured line on the
//! `batchline::metrics` log target so a run can be replayed from the log.
//!
//! The `#[cfg(debug_assertions)]` attribute compiles every call out of release builds.

/// Logs a structured key-value metric line at `trace` level, only in debug builds.
///
/// # Example
/// ```
/// use batchline::log_metric;
/// let rows = 4;
/// log_metric!("event" = "flip", "rows" = &rows);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        #[cfg(debug_assertions)]
        {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+
            log::trace!(target: "batchline::metrics", "{{ {} }}", parts.join(", "));
        }
    };
}
