//! Tunnelgate - terminal gateway to agents on an overlay network
//!
//! Accepts browser WebSocket sessions, dials the target agent over the
//! overlay (falling back to an in-process relay), and bridges the socket to a
//! reconnecting PTY on the agent.

pub mod config;
pub mod gateway;

pub use config::{expand_env_vars, GatewayConfig};
pub use gateway::{Collaborators, Gateway};

pub use tunnelgate_overlay as overlay;
pub use tunnelgate_proxy as proxy;
pub use tunnelgate_tunnel as tunnel;


use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins when set. Does nothing if a subscriber is already installed.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "tunnelgate=debug,tunnelgate_tunnel=debug,tunnelgate_proxy=debug".into()
        } else {
            "tunnelgate=info,tunnelgate_tunnel=info,tunnelgate_proxy=info".into()
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
