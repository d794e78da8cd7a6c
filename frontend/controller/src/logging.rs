use std::panic;

/// Initializes `env_logger` once. `RUST_LOG` wins over `default_level`.
pub fn init(default_level: log::LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.format_timestamp_millis();
    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

/// Routes panics through the logger before the default hook prints them, so
/// they end up wherever the log output goes.
pub fn setup_panic_hook() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());

        log::error!(
            "panic in {} v{} at {}: {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            location,
            message
        );

        default_hook(panic_info);
    }));
}
