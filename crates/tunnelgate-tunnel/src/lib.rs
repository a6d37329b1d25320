//! Tunnel dialing and connection caching
//!
//! [`TunnelDialer`] establishes overlay connections to agents, falling back to
//! an in-process relay for embedded relay regions. [`ConnectionCache`] shares
//! those connections between sessions and hands out [`Lease`]s.

pub mod cache;
pub mod connection;
pub mod descriptors;
pub mod dialer;
pub mod error;
pub mod pty;
pub mod relay_bridge;

pub use cache::{AgentConnector, AgentDialer, CacheableConn, ConnectionCache, Lease};
pub use connection::TunnelConnection;
pub use descriptors::DescriptorChannel;
pub use dialer::{DialerConfig, TunnelDialer};
pub use error::TunnelError;
pub use pty::{PtyDialer, PtyInit};
pub use relay_bridge::{BridgeEnd, EmbeddedRelayDialer, RelayBridge};
