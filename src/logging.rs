use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "REMINDER_VAULT_LOG";

pub fn default_filter(component: &str) -> String {
    format!("info,reminder_vault=debug,{component}=debug")
}

pub fn init_tracing(component: &str) {
    let filter = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter(component)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
