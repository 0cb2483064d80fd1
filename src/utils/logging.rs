use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,nazr_people=info".to_string());
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_ansi(false);
    // Tests and embedders may have installed a subscriber already.
    let _ = fmt.try_init();
}
