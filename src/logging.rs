use env_logger::{Builder, Env};

/// `GESTURECTL_LOG` wins over `RUST_LOG`; `info` when neither is set.
pub fn init() {
    let env = Env::default()
        .filter_or("GESTURECTL_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .write_style("GESTURECTL_LOG_STYLE");
    Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(false)
        .init();
}
