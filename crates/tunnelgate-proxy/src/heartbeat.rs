//! Keep-alive pings on an upgraded socket

use crate::ws::WsControl;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest interval between pings
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Ping every `period` until `token` is cancelled or the socket goes away
///
/// Periods below [`MIN_HEARTBEAT_INTERVAL`] are raised to it.
pub fn spawn(control: WsControl, token: CancellationToken, period: Duration) -> JoinHandle<()> {
    let period = period.max(MIN_HEARTBEAT_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = control.ping().await {
                        tracing::debug!("Heartbeat stopped: {}", e);
                        break;
                    }
                    tracing::trace!("Heartbeat ping sent");
                }
            }
        }
    })
}
