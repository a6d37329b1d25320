//! Reconnecting PTY WebSocket endpoint

use crate::bicopy::bicopy;
use crate::heartbeat;
use crate::models::Response;
use crate::netconn::CancelOnError;
use crate::params::parse_pty_params;
use crate::ticket::{Ticket, TicketRequest, TicketResolver};
use crate::tracker::{InFlightGuard, InFlightTracker};
use crate::ws;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunnelgate_tunnel::{AgentConnector, PtyDialer, PtyInit};

pub const PTY_ROUTE: &str = "/api/v2/workspaceagents/{workspaceagent}/pty";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Interval between keep-alive pings
    pub heartbeat_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Bridges browser terminals to agent PTYs
pub struct PtyProxy {
    resolver: Arc<dyn TicketResolver>,
    connector: Arc<dyn AgentConnector>,
    tracker: InFlightTracker,
    shutdown: CancellationToken,
    config: ProxyConfig,
}

impl PtyProxy {
    /// Create a proxy; cancelling `shutdown` ends every live session
    pub fn new(
        resolver: Arc<dyn TicketResolver>,
        connector: Arc<dyn AgentConnector>,
        tracker: InFlightTracker,
        shutdown: CancellationToken,
        config: ProxyConfig,
    ) -> Self {
        Self {
            resolver,
            connector,
            tracker,
            shutdown,
            config,
        }
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(PTY_ROUTE, get(workspace_agent_pty))
            .with_state(self)
    }

    async fn run_session(
        self: Arc<Self>,
        socket: WebSocket,
        ticket: Ticket,
        init: PtyInit,
        _guard: InFlightGuard,
    ) {
        let agent = ticket.agent;
        let token = self.shutdown.child_token();
        let (stream, control, writer) = ws::split(socket);
        let mut inbound = CancelOnError::new(stream, token.clone());
        let heartbeat = heartbeat::spawn(
            control.clone(),
            token.clone(),
            self.config.heartbeat_interval,
        );

        info!(agent_id = %agent, reconnect = %init.id, "PTY session started");

        match self.connector.connect(agent).await {
            Err(e) => {
                warn!(agent_id = %agent, "Failed to dial workspace agent: {}", e);
                control
                    .close(close_code::ERROR, &format!("dial workspace agent: {e}"))
                    .await;
                let _ = inbound.close().await;
            }
            Ok(lease) => {
                let opened = lease.reconnecting_pty(&init).await;
                match opened {
                    Err(e) => {
                        warn!(agent_id = %agent, "Failed to open reconnecting PTY: {}", e);
                        control.close(close_code::ERROR, &format!("dial: {e}")).await;
                        let _ = inbound.close().await;
                        lease.release();
                    }
                    Ok(mut pty) => {
                        let end = bicopy(&token, &mut inbound, &mut pty).await;
                        debug!(agent_id = %agent, ?end, "PTY bridge finished");
                        let _ = inbound.close().await;
                        let _ = pty.shutdown().await;
                        drop(pty);
                        lease.release();
                    }
                }
            }
        }

        token.cancel();
        let _ = heartbeat.await;
        drop(inbound);
        drop(control);
        let _ = writer.await;

        info!(agent_id = %agent, reconnect = %init.id, "PTY session ended");
    }
}

fn bad_request(body: Response) -> HttpResponse {
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Upgrade to a WebSocket and bridge it to a reconnecting PTY on the agent
pub async fn workspace_agent_pty(
    State(proxy): State<Arc<PtyProxy>>,
    Path(agent): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    uri: Uri,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> HttpResponse {
    let guard = proxy.tracker.enter();

    let ticket = match proxy
        .resolver
        .resolve(TicketRequest {
            agent,
            base_path: uri.path().to_string(),
            headers,
        })
        .await
    {
        Ok(ticket) => ticket,
        Err(response) => return response,
    };

    let init = match parse_pty_params(&query) {
        Ok(init) => init,
        Err(validations) => {
            debug!(count = validations.len(), "Rejecting PTY request with invalid parameters");
            return bad_request(Response {
                message: "Invalid query parameters.".to_string(),
                detail: None,
                validations,
            });
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            return bad_request(
                Response::new("Failed to accept websocket.").with_detail(rejection.body_text()),
            );
        }
    };

    upgrade
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| proxy.run_session(socket, ticket, init, guard))
}
