use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Quiet defaults for the HTTP and RPC stacks; `RUST_LOG` overrides everything.
const DEFAULT_FILTER: &str =
    "info,h2=warn,hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,sqlx=warn";

pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(fmt::layer().json().with_target(false).with_current_span(false))
            .init();
    } else {
        subscriber.with(fmt::layer().with_target(true).compact()).init();
    }
}
