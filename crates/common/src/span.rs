/// Enters an info-level span. Fields follow the name as in `tracing::info_span!`:
/// `span!("load_samples", count = indices.len())`.
#[macro_export]
macro_rules! span {
    ($name:literal $(, $($fields:tt)*)?) => {
        ::tracing::info_span!($name $(, $($fields)*)?).entered()
    };
}

/// Debug-level counterpart of [`span!`], for per-sample work.
#[macro_export]
macro_rules! span_debug {
    ($name:literal $(, $($fields:tt)*)?) => {
        ::tracing::debug_span!($name $(, $($fields)*)?).entered()
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn spans_accept_fields() {
        let samples = [1, 2, 3];
        let _outer = span!("run", scenario = %"Offline");
        let _inner = span_debug!("query", samples = samples.len());
        let _bare = span!("bare");
    }
}
