use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Default filter when `RUST_LOG` is unset: pipeline at info, sqlx chatter muted.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,reqwest=warn";

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `verbose` bumps the crate's own target to debug so payload dumps become
/// visible without touching `RUST_LOG`.
pub fn init_tracing(default_filter: &str, verbose: bool) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(format!("{default_filter},mage_migrate=debug"))
        } else {
            EnvFilter::new(default_filter)
        }
    });

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
