/// Tracing subscriber setup for the run binary and integration tests.

use tracing::Level;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Emit per-item `debug!` detail.
    pub verbose: bool,
    /// One JSON object per line instead of compact text.
    pub json: bool,
}

impl LogOptions {
    pub fn max_level(&self) -> Level {
        if self.verbose { Level::DEBUG } else { Level::INFO }
    }
}

/// Installs the global subscriber. Returns `false` if one was already set,
/// which makes repeated calls harmless.
pub fn init_logging(options: LogOptions) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_max_level(options.max_level())
        .with_target(false);

    let result = if options.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    result.is_ok()
}
