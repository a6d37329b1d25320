//! WebSocket terminal proxy
//!
//! Serves `GET /api/v2/workspaceagents/{workspaceagent}/pty`: validates the
//! request, upgrades it to a binary WebSocket, leases a tunnel connection to
//! the agent and bridges the socket to a reconnecting PTY on it.

pub mod bicopy;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod models;
pub mod netconn;
pub mod params;
pub mod ticket;
pub mod tracker;
pub mod ws;

pub use bicopy::{bicopy, BicopyEnd};
pub use error::ProxyError;
pub use handler::{workspace_agent_pty, ProxyConfig, PtyProxy, PTY_ROUTE};
pub use models::{Response, ValidationError};
pub use netconn::CancelOnError;
pub use params::{parse_pty_params, QueryParamParser};
pub use ticket::{AgentIdTicketResolver, Ticket, TicketRequest, TicketResolver};
pub use tracker::{InFlightGuard, InFlightTracker};
pub use ws::{truncate_reason, WsByteStream, WsControl};
