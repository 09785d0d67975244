//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` always wins. Without it, `debug` selects verbose output for
/// the pulse crates. Returns `false` if a subscriber was already installed.
pub fn init_tracing(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn default_directives(debug: bool) -> &'static str {
    if debug {
        "info,pulse_sync=debug,pulse_db=debug,sqlx=warn"
    } else {
        "info,sqlx=warn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_directives() {
        assert!(default_directives(true).contains("pulse_sync=debug"));
        assert!(!default_directives(false).contains("debug"));
    }

    #[test]
    fn test_second_init_is_harmless() {
        let _ = init_tracing(false);
        assert!(!init_tracing(true));
    }
}
