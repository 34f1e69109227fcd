//! Subscriber installation for hosts.
//!
//! Library crates only emit `tracing` events with structured fields. A host
//! binary calls [`init_subscriber`] once, before building a session.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a stderr subscriber filtered at `level`, unless `RUST_LOG` says
/// otherwise. With `json` set, each event is one JSON object per line.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_subscriber(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (plain, structured) = if json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().compact().with_writer(std::io::stderr)), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_install_wins() {
        let _ = init_subscriber("warn", false);
        assert!(!init_subscriber("debug", true));
        tracing::info!(component = "counter", "still logging");
    }
}
