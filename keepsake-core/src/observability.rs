/*!
Observability setup for Keepsake.

The core logs through `tracing` at every point where a failure is absorbed instead of
returned (undecryptable content, backups, parse failures, skipped or failed saves).
Hosts that do not install their own subscriber can call [`init_observability`].
*/

use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SaveError};

/// Directive applied on top of `RUST_LOG`
const DEFAULT_DIRECTIVE: &str = "keepsake=info";

/// Initialize the global tracing subscriber
///
/// Installs an `EnvFilter` read from `RUST_LOG` plus the `keepsake=info` directive and a
/// fmt layer writing either JSON lines (`json = true`) or human-readable text.
///
/// # Errors
/// Returns a storage error if a global subscriber is already installed.
pub fn init_observability(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(
        DEFAULT_DIRECTIVE
            .parse()
            .map_err(|e| SaveError::validation(format!("invalid log directive: {e}")))?,
    );

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        SaveError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Keepsake observability initialized");
    Ok(())
}

/// Initialize observability with JSON output
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}
