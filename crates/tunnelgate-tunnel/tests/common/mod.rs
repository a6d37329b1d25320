//! In-memory overlay collaborators for dialer tests

#![allow(dead_code)]

use async_trait::async_trait;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tunnelgate_overlay::{
    AgentId, BoxedStream, Coordinator, Descriptor, EndpointFactory, EndpointOptions,
    OverlayEndpoint, OverlayError, OverlayResult, RegionDialer, RelayMap, RelayRegion,
    RelayServer,
};
use uuid::Uuid;

pub const RELAY_GREETING: &[u8] = b"relay-hello";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Immediate,
    Unreachable,
    Never,
}

/// Decrements a counter when dropped
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeEndpoint {
    pub addresses: Vec<IpNet>,
    pub relay_map: Arc<RelayMap>,
    region_dialer: Mutex<Option<Arc<dyn RegionDialer>>>,
    sink: Mutex<Option<mpsc::UnboundedSender<Vec<Descriptor>>>>,
    pub applied: Mutex<Vec<(Vec<Descriptor>, bool)>>,
    reachability: Reachability,
    pub close_calls: AtomicUsize,
    closed: CancellationToken,
    pty_tx: mpsc::UnboundedSender<(SocketAddr, DuplexStream)>,
    pty_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(SocketAddr, DuplexStream)>>,
}

impl FakeEndpoint {
    fn new(options: EndpointOptions, reachability: Reachability) -> Self {
        let (pty_tx, pty_rx) = mpsc::unbounded_channel();
        Self {
            addresses: options.addresses,
            relay_map: options.relay_map,
            region_dialer: Mutex::new(None),
            sink: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            reachability,
            close_calls: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            pty_tx,
            pty_rx: tokio::sync::Mutex::new(pty_rx),
        }
    }

    pub fn region_dialer(&self) -> Option<Arc<dyn RegionDialer>> {
        self.region_dialer.lock().unwrap().clone()
    }

    /// Publish a local descriptor update
    pub fn emit(&self, batch: Vec<Descriptor>) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(batch).is_ok(),
            None => false,
        }
    }

    pub fn applied(&self) -> Vec<(Vec<Descriptor>, bool)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Next stream opened with `dial_tcp`, agent side
    pub async fn next_dialed(&self) -> Option<(SocketAddr, DuplexStream)> {
        self.pty_rx.lock().await.recv().await
    }
}

#[async_trait]
impl OverlayEndpoint for FakeEndpoint {
    fn addresses(&self) -> Vec<IpNet> {
        self.addresses.clone()
    }

    fn set_region_dialer(&self, dialer: Arc<dyn RegionDialer>) {
        *self.region_dialer.lock().unwrap() = Some(dialer);
    }

    fn set_descriptor_sink(&self, sink: mpsc::UnboundedSender<Vec<Descriptor>>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn update_descriptors(
        &self,
        descriptors: Vec<Descriptor>,
        replace: bool,
    ) -> OverlayResult<()> {
        self.applied.lock().unwrap().push((descriptors, replace));
        Ok(())
    }

    async fn await_reachable(&self) -> bool {
        match self.reachability {
            Reachability::Immediate => true,
            Reachability::Unreachable => false,
            Reachability::Never => {
                self.closed.cancelled().await;
                false
            }
        }
    }

    async fn dial_tcp(&self, addr: SocketAddr) -> OverlayResult<BoxedStream> {
        if self.closed.is_cancelled() {
            return Err(OverlayError::Closed);
        }
        let (near, far) = tokio::io::duplex(64 * 1024);
        self.pty_tx
            .send((addr, far))
            .map_err(|_| OverlayError::Closed)?;
        Ok(Box::new(near))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        self.sink.lock().unwrap().take();
    }
}

pub struct FakeFactory {
    fail: bool,
    reachability: Reachability,
    pub endpoints: Mutex<Vec<Arc<FakeEndpoint>>>,
}

impl FakeFactory {
    pub fn new(reachability: Reachability) -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            reachability,
            endpoints: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            reachability: Reachability::Immediate,
            endpoints: Mutex::new(Vec::new()),
        })
    }

    pub fn endpoint(&self, index: usize) -> Arc<FakeEndpoint> {
        self.endpoints.lock().unwrap()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }
}

#[async_trait]
impl EndpointFactory for FakeFactory {
    async fn create(&self, options: EndpointOptions) -> OverlayResult<Arc<dyn OverlayEndpoint>> {
        if self.fail {
            return Err(OverlayError::Creation("no tun device".to_string()));
        }
        let endpoint = Arc::new(FakeEndpoint::new(options, self.reachability));
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(endpoint)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CoordinatorMode {
    Serve,
    FailAfter(Duration),
    EndAfter(Duration),
}

pub struct FakeCoordinator {
    mode: CoordinatorMode,
    pub sessions: Mutex<Vec<(Uuid, AgentId)>>,
    pub received: Mutex<Vec<Vec<Descriptor>>>,
    pub active: Arc<AtomicUsize>,
    to_client_tx: mpsc::UnboundedSender<Vec<Descriptor>>,
    to_client_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<Descriptor>>>>,
}

impl FakeCoordinator {
    pub fn new(mode: CoordinatorMode) -> Arc<Self> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            mode,
            sessions: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            to_client_tx,
            to_client_rx: Mutex::new(Some(to_client_rx)),
        })
    }

    /// Queue a descriptor batch for the client
    pub fn send_to_client(&self, batch: Vec<Descriptor>) {
        let _ = self.to_client_tx.send(batch);
    }

    pub fn received(&self) -> Vec<Vec<Descriptor>> {
        self.received.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn serve_client(
        &self,
        transport: BoxedStream,
        session_id: Uuid,
        agent: AgentId,
    ) -> OverlayResult<()> {
        let _active = ActiveGuard::enter(&self.active);
        self.sessions.lock().unwrap().push((session_id, agent));

        match self.mode {
            CoordinatorMode::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                return Err(OverlayError::Coordinator("agent went away".to_string()));
            }
            CoordinatorMode::EndAfter(delay) => {
                tokio::time::sleep(delay).await;
                return Ok(());
            }
            CoordinatorMode::Serve => {}
        }

        let (read_half, mut write_half) = tokio::io::split(transport);
        let mut lines = BufReader::new(read_half).lines();
        let mut outgoing = self.to_client_rx.lock().unwrap().take();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let batch: Vec<Descriptor> = serde_json::from_str(&line)
                            .map_err(|e| OverlayError::Coordinator(e.to_string()))?;
                        self.received.lock().unwrap().push(batch);
                    }
                    Ok(None) | Err(_) => break,
                },
                batch = recv_opt(&mut outgoing) => match batch {
                    Some(batch) => {
                        let mut line = serde_json::to_string(&batch)
                            .map_err(|e| OverlayError::Coordinator(e.to_string()))?;
                        line.push('\n');
                        write_half.write_all(line.as_bytes()).await?;
                    }
                    None => outgoing = None,
                },
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRelay {
    pub tags: Mutex<Vec<String>>,
    pub active: Arc<AtomicUsize>,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayServer for FakeRelay {
    async fn accept(&self, token: CancellationToken, mut transport: BoxedStream, tag: &str) {
        let _active = ActiveGuard::enter(&self.active);
        self.tags.lock().unwrap().push(tag.to_string());

        if transport.write_all(RELAY_GREETING).await.is_err() || transport.flush().await.is_err() {
            return;
        }
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                read = transport.read(&mut buf) => match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                },
            }
        }
    }
}

pub fn region(id: u16, embedded: bool) -> RelayRegion {
    RelayRegion {
        region_id: id,
        region_code: format!("r{id}"),
        region_name: format!("Region {id}"),
        embedded_relay: embedded,
        nodes: Vec::new(),
    }
}

pub fn relay_map() -> Arc<RelayMap> {
    Arc::new(RelayMap::from_regions(vec![region(1, false), region(999, true)]).unwrap())
}

/// Poll `check` until it holds or a second passes
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
