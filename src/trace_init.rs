//! Optional JSON tracing sink for hosts that embed this crate directly
//! (the CLI binaries run with `tracing`'s default `max_level_off`
//! feature and never call this). Gated behind the `trace` feature so a
//! release build pays nothing for it otherwise.

#[cfg(feature = "trace")]
use std::path::Path;
#[cfg(feature = "trace")]
use std::sync::Once;

#[cfg(feature = "trace")]
static INIT: Once = Once::new();

/// Filter directive presets, scoped to this crate's own target so a
/// host process's broader tracing setup isn't drowned out by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Warn,
    Info,
    Debug,
}

#[cfg(feature = "trace")]
impl TraceLevel {
    fn directive(self) -> &'static str {
        match self {
            TraceLevel::Warn => "lex_compose=warn",
            TraceLevel::Info => "lex_compose=info",
            TraceLevel::Debug => "lex_compose=debug",
        }
    }
}

/// Install a daily-rolling JSON tracing sink under `log_dir`, once per
/// process. Returns whether this call performed the install — later
/// calls with a different `log_dir`/`level` are silently ignored, same
/// as any other `Once`-guarded setup, so the caller can tell whether to
/// trust the arguments it passed.
#[cfg(feature = "trace")]
pub fn init_tracing(log_dir: &Path, level: TraceLevel) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let file_appender = tracing_appender::rolling::daily(log_dir, "lex-compose.trace.jsonl");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        std::mem::forget(guard); // the composer outlives this call; never flush on drop

        tracing_subscriber::fmt()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.directive())),
            )
            .init();
        installed = true;
    });
    installed
}

#[cfg(not(feature = "trace"))]
pub fn init_tracing(_log_dir: &std::path::Path, _level: TraceLevel) -> bool {
    false
}
