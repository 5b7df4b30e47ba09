//! Tracing setup for the server binary.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` controls filtering. `GREENROOM_LOG_FORMAT=json` switches to
/// newline-delimited JSON for log shippers; the default is human-readable
/// console output.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,greenroom_server=debug,greenroom_chat=debug"));

    let json = std::env::var("GREENROOM_LOG_FORMAT")
        .is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
