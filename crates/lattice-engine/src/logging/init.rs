use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "lattice_engine::store=debug,lattice_engine::coordinator=trace").
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Include the emitting module path in each record.
    pub show_module: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            show_module: true,
        }
    }
}

static INIT: Once = Once::new();

/// Installs the `env_logger` backend once per process.
///
/// The library itself only talks to the `log` facade; hosts call this early in
/// `main`. Subsequent calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match config.env_filter {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => match std::env::var("RUST_LOG") {
                Ok(filter) => {
                    builder.parse_filters(&filter);
                }
                Err(_) => {
                    builder.filter_level(log::LevelFilter::Info);
                }
            },
        }

        builder.write_style(config.write_style);
        builder.format_module_path(config.show_module);

        // try_init: a test harness may already own the global logger.
        if builder.try_init().is_ok() {
            log::debug!("lattice logging initialized");
        }
    });
}
