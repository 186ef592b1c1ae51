pub mod pgrelay;

pub use crate::pgrelay::*;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a process-wide `tracing` subscriber writing to stdout. An
/// embedding binary is free to install its own subscriber instead; nothing
/// in `pgrelay` depends on this one being active, it only exists as the
/// same one-line convenience the original listener/service binary offered.
pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
