use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,handoff_lib=debug";

/// Initialize tracing with stdout and Sentry layers.
///
/// - Stdout: compact, human-readable, with file/line for diagnosing poll cycles
/// - Sentry: captures ERROR events as issues, WARN as breadcrumbs
/// - Default level: INFO (crate at DEBUG), override via RUST_LOG env
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .compact();

    // No-op when Sentry DSN is not configured.
    let sentry_layer = sentry_tracing::layer().event_filter(|meta| match *meta.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    });

    // `try_init` so a second call (tests, embedding) does not panic.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(sentry_layer)
        .try_init();

    tracing::debug!("Tracing initialized");
}

/// Sentry options for the service binary. Returns a no-op client when
/// `SENTRY_DSN` is unset.
pub fn sentry_options() -> sentry::ClientOptions {
    sentry::ClientOptions {
        dsn: std::env::var("SENTRY_DSN").ok().and_then(|s| s.parse().ok()),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        traces_sample_rate: 0.0,
        // Contact ids are phone numbers; never ship them.
        send_default_pii: false,
        before_send: Some(std::sync::Arc::new(|mut event| {
            if let Some(ref mut user) = event.user {
                user.email = None;
                user.ip_address = None;
                user.username = None;
            }
            Some(event)
        })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn test_sentry_options_never_send_pii() {
        let opts = sentry_options();
        assert!(!opts.send_default_pii);
        assert!(opts.before_send.is_some());
    }
}
