use crate::cli::LogLevel;

impl LogLevel {
    const fn filter(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Error => Some("error"),
            Self::Warn => Some("warn"),
            Self::Info => Some("info"),
            Self::Debug => Some("debug"),
            Self::Trace => Some("trace"),
        }
    }
}

/// Installs the global logger. `RUST_LOG` overrides `level` when set.
pub fn init(level: LogLevel) {
    let Some(filter) = level.filter() else {
        return;
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", filter);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}
