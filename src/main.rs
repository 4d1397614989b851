fn main() {
    // Initialize Sentry before anything else so panics during startup are captured.
    // Returns a no-op guard when SENTRY_DSN is absent (local dev).
    let sentry_guard = sentry::init(handoff_lib::logging::sentry_options());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to build tokio runtime: {e}");
            drop(sentry_guard);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(handoff_lib::run()) {
        tracing::error!(kind = e.kind(), "Service exited with error: {}", e);
        drop(runtime);
        drop(sentry_guard);
        std::process::exit(1);
    }
}
