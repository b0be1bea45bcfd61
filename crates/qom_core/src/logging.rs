use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(level: &str) -> EnvFilter {
    // RUST_LOG takes precedence over the requested level.
    let default_filter = format!("qom_core={level}");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs a stderr `fmt` subscriber for the crate's `tracing` events.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case that subscriber keeps receiving the events.
pub fn init(level: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(level, "qom_core logging initialized");
    }
    installed
}

/// Like [`init`], but routes output through the test harness capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::{init, init_for_tests};

    #[test]
    fn second_init_is_tolerated() {
        init_for_tests();
        assert!(!init("info"));
    }
}
