//! # Gateway Session
//!
//! One [`GatewaySession`] owns one WebSocket connection to the gateway and
//! drives it through connect, login, device enumeration and periodic polling.
//! All decisions are made by [`SessionState`]; this module only moves frames,
//! runs the timers and executes the resulting actions.
//!
//! Timers per connection:
//! - poll trigger, every `poll_interval_secs`
//! - request timeout, armed by every send and disarmed by any inbound frame
//! - watchdog, checked every poll interval against the last inbound frame
//!
//! Session time follows the tokio clock, so a paused runtime drives every
//! timer deterministically. Meter augmentation at the end of a sweep is
//! bounded by [`METER_AUGMENT_TIMEOUT_MS`].
//!
//! Any failure tears the connection down and reconnects after
//! `RECONNECT_DELAY_MULTIPLIER × poll_interval`. Only shutdown ends [`run`].
//!
//! [`run`]: GatewaySession::run

pub mod message;
pub mod points;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, sleep, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::client::{ModbusTcpClient, RegisterRead};
use crate::config::GatewayConfig;
use crate::constants::{METER_AUGMENT_TIMEOUT_MS, RECONNECT_DELAY_MULTIPLIER, REQUEST_TIMEOUT_MS};
use crate::error::{BridgeError, BridgeResult};
use crate::labels::LabelTable;
use crate::meter::MeterReader;
use crate::store::{DeviceRecord, DeviceStatusStore};

pub use message::{Inbound, Outbound, ProtocolGeneration, Request, Service};
pub use points::{direct_points, parse_value, real_points, PointUpdate};
pub use state::{
    stages_for, watchdog_expired, InFlight, Phase, ReconnectReason, SessionAction, SessionEvent,
    SessionSettings, SessionState, Stage,
};

/// Receives the device list and the store after every completed sweep.
///
/// Implementations clear the dirty flags of what they delivered.
pub trait Publisher: Send {
    fn publish(&mut self, devices: &[DeviceRecord], store: &mut DeviceStatusStore);
}

impl<F> Publisher for F
where
    F: FnMut(&[DeviceRecord], &mut DeviceStatusStore) + Send,
{
    fn publish(&mut self, devices: &[DeviceRecord], store: &mut DeviceStatusStore) {
        self(devices, store)
    }
}

/// Logs every dirty point and marks it delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPublisher;

impl Publisher for LoggingPublisher {
    fn publish(&mut self, devices: &[DeviceRecord], store: &mut DeviceStatusStore) {
        for device in devices {
            let mut delivered = 0;
            for point in store.dirty_points(&device.id) {
                let value = point
                    .value
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |v| v.to_string());
                info!(
                    "{} {}: {} {}",
                    device.serial_number,
                    point.name,
                    value,
                    point.unit.as_deref().unwrap_or("")
                );
                delivered += 1;
            }
            store.mark_device_delivered(&device.id);
            debug!("Delivered {} points of {}", delivered, device.serial_number);
        }
    }
}

#[derive(Debug)]
enum Exit {
    Shutdown,
    Reconnect(String),
}

enum Wake {
    Frame(Option<Result<Message, WsError>>),
    Poll,
    RequestTimeout,
    Watchdog,
    Shutdown,
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wall-clock time advanced by the tokio clock.
struct SessionClock {
    origin: Instant,
    wall: DateTime<Utc>,
}

impl SessionClock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.origin.elapsed())
            .map_or(self.wall, |elapsed| self.wall + elapsed)
    }
}

fn periodic(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Session with one gateway, optionally augmented by a register meter.
pub struct GatewaySession<P: Publisher, C: RegisterRead = ModbusTcpClient> {
    config: GatewayConfig,
    labels: Arc<LabelTable>,
    state: SessionState,
    store: DeviceStatusStore,
    publisher: P,
    meter: Option<Arc<Mutex<MeterReader<C>>>>,
}

impl<P: Publisher, C: RegisterRead> GatewaySession<P, C> {
    pub fn new(config: GatewayConfig, labels: Arc<LabelTable>, publisher: P) -> Self {
        let state = SessionState::new(SessionSettings {
            lang: config.lang.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            poll_interval_secs: config.poll_interval_secs,
        });
        Self {
            config,
            labels,
            state,
            store: DeviceStatusStore::new(),
            publisher,
            meter: None,
        }
    }

    /// Merge meter data into the store at the end of every sweep.
    pub fn with_meter(mut self, meter: Arc<Mutex<MeterReader<C>>>) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn store(&self) -> &DeviceStatusStore {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> BridgeResult<()> {
        let reconnect_delay = self
            .config
            .poll_interval()
            .saturating_mul(RECONNECT_DELAY_MULTIPLIER as u32);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_connection(&mut shutdown).await {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::Reconnect(reason)) => error!("Gateway session lost: {}", reason),
                Err(e) => error!("Gateway session failed: {}", e),
            }
            info!("Reconnecting in {:?}", reconnect_delay);
            tokio::select! {
                _ = sleep(reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Gateway session stopped");
        Ok(())
    }

    async fn run_connection(&mut self, shutdown: &mut watch::Receiver<bool>) -> BridgeResult<Exit> {
        let url = self.config.url();
        info!("Connecting to gateway {}", url);
        let request_timeout = Duration::from_millis(REQUEST_TIMEOUT_MS);
        let (stream, _) = tokio::time::timeout(request_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BridgeError::timeout(format!("connect {}", url), REQUEST_TIMEOUT_MS))??;

        let (mut write, mut read) = stream.split();
        let result = self.drive(&mut write, &mut read, shutdown).await;
        if let Err(e) = write.close().await {
            debug!("Closing gateway socket: {}", e);
        }
        result
    }

    async fn drive<W, R>(
        &mut self,
        write: &mut W,
        read: &mut R,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BridgeResult<Exit>
    where
        W: Sink<Message, Error = WsError> + Unpin,
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let clock = SessionClock::start();
        self.state.reset(clock.now());
        let mut poll: Option<Interval> = None;
        let mut deadline: Option<Instant> = None;
        let mut watchdog = periodic(self.config.poll_interval());

        let now = clock.now();
        let actions = self
            .state
            .handle(SessionEvent::Opened, &mut self.store, &self.labels, now);
        if let Some(exit) = self
            .execute(actions, write, &mut poll, &mut deadline, now)
            .await?
        {
            return Ok(exit);
        }

        loop {
            let wake = tokio::select! {
                _ = shutdown.changed() => Wake::Shutdown,
                frame = read.next() => Wake::Frame(frame),
                _ = next_poll(&mut poll) => Wake::Poll,
                _ = until(deadline) => Wake::RequestTimeout,
                _ = watchdog.tick() => Wake::Watchdog,
            };

            let now = clock.now();
            let actions = match wake {
                Wake::Shutdown => return Ok(Exit::Shutdown),
                Wake::Frame(None) => return Ok(Exit::Reconnect("gateway closed the stream".into())),
                Wake::Frame(Some(Err(e))) => return Err(e.into()),
                Wake::Frame(Some(Ok(Message::Close(frame)))) => {
                    return Ok(Exit::Reconnect(format!("gateway sent close: {:?}", frame)))
                }
                Wake::Frame(Some(Ok(Message::Text(text)))) => {
                    deadline = None;
                    self.state.handle(
                        SessionEvent::Inbound(&text),
                        &mut self.store,
                        &self.labels,
                        now,
                    )
                }
                Wake::Frame(Some(Ok(other))) => {
                    debug!("Ignoring non-text frame ({} bytes)", other.len());
                    continue;
                }
                Wake::Poll => {
                    self.state
                        .handle(SessionEvent::PollTick, &mut self.store, &self.labels, now)
                }
                Wake::RequestTimeout => {
                    deadline = None;
                    self.state.handle(
                        SessionEvent::RequestTimeout,
                        &mut self.store,
                        &self.labels,
                        now,
                    )
                }
                Wake::Watchdog => self.state.handle(
                    SessionEvent::WatchdogCheck,
                    &mut self.store,
                    &self.labels,
                    now,
                ),
            };

            if let Some(exit) = self
                .execute(actions, write, &mut poll, &mut deadline, now)
                .await?
            {
                return Ok(exit);
            }
        }
    }

    async fn execute<W>(
        &mut self,
        actions: Vec<SessionAction>,
        write: &mut W,
        poll: &mut Option<Interval>,
        deadline: &mut Option<Instant>,
        now: DateTime<Utc>,
    ) -> BridgeResult<Option<Exit>>
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        for action in actions {
            match action {
                SessionAction::Send(outbound) => {
                    debug!("Sending {}", outbound.request.service());
                    write.send(Message::Text(outbound.to_json()?)).await?;
                    *deadline = Some(Instant::now() + Duration::from_millis(REQUEST_TIMEOUT_MS));
                }
                SessionAction::StartPolling => {
                    info!(
                        "Polling {} device(s) every {}s",
                        self.state.devices().len(),
                        self.config.poll_interval_secs
                    );
                    *poll = Some(periodic(self.config.poll_interval()));
                }
                SessionAction::SweepComplete => self.complete_sweep(now).await,
                SessionAction::Reconnect(reason) => {
                    return Ok(Some(Exit::Reconnect(reason.to_string())))
                }
            }
        }
        Ok(None)
    }

    async fn complete_sweep(&mut self, now: DateTime<Utc>) {
        if let Some(meter) = &self.meter {
            let devices = self.state.devices();
            let store = &mut self.store;
            let augment = async move { meter.lock().await.augment(devices, store, now).await };
            let limit = Duration::from_millis(METER_AUGMENT_TIMEOUT_MS);
            if tokio::time::timeout(limit, augment).await.is_err() {
                warn!("Meter augmentation exceeded {:?}, skipped", limit);
                // an abandoned read may leave half a frame on the link
                if let Ok(mut reader) = meter.try_lock() {
                    if let Err(e) = reader.disconnect().await {
                        debug!("Meter disconnect failed: {}", e);
                    }
                }
            }
        }
        debug!("Sweep complete, {} dirty points", self.store.dirty_count());
        self.publisher.publish(self.state.devices(), &mut self.store);
    }
}
