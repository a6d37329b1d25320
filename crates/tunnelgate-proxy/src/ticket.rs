//! Request authorization
//!
//! A [`TicketResolver`] decides whether a request may reach an agent. On
//! rejection it renders the failure response itself and the handler returns
//! it untouched.

use crate::models::Response;
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::Json;
use tunnelgate_overlay::AgentId;

/// What the resolver gets to look at
#[derive(Debug, Clone)]
pub struct TicketRequest {
    /// Raw agent path segment
    pub agent: String,
    /// Path the request was routed on
    pub base_path: String,
    pub headers: HeaderMap,
}

/// Authorization outcome for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub agent: AgentId,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketResolver: Send + Sync {
    async fn resolve(&self, request: TicketRequest) -> Result<Ticket, HttpResponse>;
}

/// Accepts any request whose agent segment is a UUID
#[derive(Debug, Default, Clone)]
pub struct AgentIdTicketResolver;

#[async_trait]
impl TicketResolver for AgentIdTicketResolver {
    async fn resolve(&self, request: TicketRequest) -> Result<Ticket, HttpResponse> {
        match request.agent.parse::<AgentId>() {
            Ok(agent) => Ok(Ticket { agent }),
            Err(e) => Err((
                StatusCode::NOT_FOUND,
                Json(
                    Response::new("Workspace agent not found.")
                        .with_detail(format!("Invalid agent id \"{}\": {}", request.agent, e)),
                ),
            )
                .into_response()),
        }
    }
}
