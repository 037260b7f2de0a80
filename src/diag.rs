use std::fmt;

/// Sink for the driver's diagnostic output.
///
/// The levels mirror the verbosity ladder of the orchestration tools this
/// driver is written for: `vv`/`vvv` are progress messages a user asked for
/// with repeated `-v` flags, `vvvvv` carries the argument-composition trace,
/// and `debug` is the firehose (per-chunk reads, state transitions).
///
/// The driver never filters: every message is handed to the sink, which
/// decides what to keep.
pub trait Diagnostics: fmt::Debug + Send + Sync {
    /// Internal detail: chunk dumps, state transitions.
    fn debug(&self, msg: &str);

    /// Coarse progress, e.g. retry announcements.
    fn vv(&self, msg: &str);

    /// Per-operation progress, tagged with the host it concerns.
    fn vvv(&self, msg: &str, host: Option<&str>);

    /// Argument-composition trace: why each flag was added.
    fn vvvvv(&self, msg: &str, host: Option<&str>);
}

/// The default sink: forwards everything to [`tracing`].
///
/// `vv`/`vvv` map to `DEBUG`, the composition trace and the firehose to
/// `TRACE`; use a subscriber filter to pick what you want to see.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn debug(&self, msg: &str) {
        tracing::trace!("{}", msg);
    }

    fn vv(&self, msg: &str) {
        tracing::debug!("{}", msg);
    }

    fn vvv(&self, msg: &str, host: Option<&str>) {
        tracing::debug!(host, "{}", msg);
    }

    fn vvvvv(&self, msg: &str, host: Option<&str>) {
        tracing::trace!(host, "{}", msg);
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingDiagnostics;

#[cfg(test)]
mod recording {
    use super::Diagnostics;
    use std::sync::Mutex;

    /// Test sink that remembers every message in arrival order.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingDiagnostics {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingDiagnostics {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl Diagnostics for RecordingDiagnostics {
        fn debug(&self, msg: &str) {
            self.lines.lock().unwrap().push(format!("debug: {}", msg));
        }

        fn vv(&self, msg: &str) {
            self.lines.lock().unwrap().push(format!("vv: {}", msg));
        }

        fn vvv(&self, msg: &str, _host: Option<&str>) {
            self.lines.lock().unwrap().push(format!("vvv: {}", msg));
        }

        fn vvvvv(&self, msg: &str, _host: Option<&str>) {
            self.lines.lock().unwrap().push(format!("vvvvv: {}", msg));
        }
    }
}
