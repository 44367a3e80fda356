//! Optional tracing setup for binaries and tests
//!
//! The library only emits `tracing` events. [`init_tracing`] installs a
//! subscriber filtered by `RUST_LOG`, and does nothing when it is unset.

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Install a global subscriber if `RUST_LOG` is set. Safe to call more than
/// once; only the first call has an effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        if std::env::var_os("RUST_LOG").is_none() {
            return;
        }
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env())
            .try_init();
    });
}
