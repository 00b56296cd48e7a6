use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "fileshare=debug,lapin=info";

/// Initialize tracing for the worker binary.
///
/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches the
/// fmt layer to one JSON object per line.
pub fn init_telemetry(service_name: &str, environment: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    tracing::info!(
        service = service_name,
        environment = environment,
        json = json,
        "Tracing initialized"
    );
    Ok(())
}
