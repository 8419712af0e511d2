//! Gateway session state machine.
//!
//! [`SessionState::handle`] is the only place session state changes. The
//! driver feeds it one [`SessionEvent`] at a time and executes the returned
//! [`SessionAction`]s; no I/O happens in here, which keeps "at most one
//! request in flight" checkable by construction.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::constants::{MAX_SKIPPED_POLLS, WATCHDOG_INTERVAL_MULTIPLIER};
use crate::labels::LabelTable;
use crate::store::{DeviceRecord, DeviceStatusStore};

use super::message::{
    ConnectReply, DeviceListReply, DirectReply, Inbound, LoginReply, Outbound, Request, RealReply,
    Service,
};
use super::points::{direct_points, real_points, PointUpdate};

/// Telemetry request kinds a device may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Full snapshot
    Real,
    /// String/MPPT breakdown
    Direct,
    /// Battery snapshot
    RealBattery,
}

impl Stage {
    pub fn service(&self) -> Service {
        match self {
            Self::Real => Service::Real,
            Self::Direct => Service::Direct,
            Self::RealBattery => Service::RealBattery,
        }
    }

    fn request(&self, dev_id: &str, now_ms: i64) -> Request {
        let dev_id = dev_id.to_string();
        match self {
            Self::Real => Request::Real {
                dev_id,
                time123456: now_ms,
            },
            Self::Direct => Request::Direct {
                dev_id,
                time123456: now_ms,
            },
            Self::RealBattery => Request::RealBattery {
                dev_id,
                time123456: now_ms,
            },
        }
    }
}

/// Stages polled for a device type; `None` for types the bridge does not know.
pub fn stages_for(type_code: u32) -> Option<&'static [Stage]> {
    use Stage::*;
    match type_code {
        // meters, accessories
        0 => Some(&[]),
        // string inverter
        21 => Some(&[Real, Direct]),
        // hybrid inverter
        35 => Some(&[Real, RealBattery, Direct]),
        36 => Some(&[Real]),
        // battery
        43 => Some(&[Real, RealBattery]),
        44 => Some(&[Real]),
        _ => None,
    }
}

/// True once inbound silence exceeds the watchdog window, not before.
pub fn watchdog_expired(now_ms: i64, last_inbound_ms: i64, poll_interval_secs: u64) -> bool {
    let secs = i64::try_from(poll_interval_secs).unwrap_or(i64::MAX);
    let window_ms = secs
        .saturating_mul(WATCHDOG_INTERVAL_MULTIPLIER)
        .saturating_mul(1000);
    now_ms.saturating_sub(last_inbound_ms) > window_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    AwaitingToken,
    AwaitingLogin,
    Enumerating,
    Polling,
    Reconnecting,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent<'a> {
    /// Transport is open
    Opened,
    /// A text frame arrived
    Inbound(&'a str),
    /// Periodic poll trigger fired
    PollTick,
    /// The pending request saw no inbound message in time
    RequestTimeout,
    /// Periodic watchdog check
    WatchdogCheck,
}

/// Outputs of the state machine, executed by the driver in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send this message and arm the request timeout
    Send(Outbound),
    /// Arm the periodic poll trigger
    StartPolling,
    /// Sweep over all devices finished; augment and publish
    SweepComplete,
    /// Tear down and reconnect
    Reconnect(ReconnectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectReason {
    HandshakeFailed(String),
    MalformedSnapshot(String),
    TooManySkippedPolls(u32),
    RequestTimeout,
    Watchdog { silent_ms: i64 },
    Notice(String),
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            Self::MalformedSnapshot(msg) => write!(f, "malformed snapshot: {}", msg),
            Self::TooManySkippedPolls(n) => write!(f, "{} consecutive polls skipped", n),
            Self::RequestTimeout => write!(f, "request timed out"),
            Self::Watchdog { silent_ms } => write!(f, "no inbound message for {} ms", silent_ms),
            Self::Notice(msg) => write!(f, "gateway notice: {}", msg),
        }
    }
}

/// Credentials and cadence of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub lang: String,
    pub username: String,
    pub password: String,
    pub poll_interval_secs: u64,
}

/// The request currently awaiting its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub device_id: String,
    pub stage: Stage,
}

/// All mutable state of one gateway session.
#[derive(Debug)]
pub struct SessionState {
    settings: SessionSettings,
    phase: Phase,
    token: String,
    devices: Vec<DeviceRecord>,
    cursor: Option<usize>,
    stages: VecDeque<Stage>,
    in_flight: Option<InFlight>,
    skipped_polls: u32,
    last_inbound_ms: i64,
}

impl SessionState {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            phase: Phase::Disconnected,
            token: String::new(),
            devices: Vec::new(),
            cursor: None,
            stages: VecDeque::new(),
            in_flight: None,
            skipped_polls: 0,
            last_inbound_ms: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    pub fn skipped_polls(&self) -> u32 {
        self.skipped_polls
    }

    pub fn last_inbound_ms(&self) -> i64 {
        self.last_inbound_ms
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new connection attempt. Devices survive; everything tied to
    /// the previous connection does not.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.phase = Phase::Connecting;
        self.token.clear();
        self.cursor = None;
        self.stages.clear();
        self.in_flight = None;
        self.skipped_polls = 0;
        self.last_inbound_ms = now.timestamp_millis();
    }

    /// Advance the state machine by one event.
    pub fn handle(
        &mut self,
        event: SessionEvent<'_>,
        store: &mut DeviceStatusStore,
        labels: &LabelTable,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let now_ms = now.timestamp_millis();
        let actions = match event {
            SessionEvent::Opened => {
                self.phase = Phase::AwaitingToken;
                vec![self.send(Request::Connect {
                    username: self.settings.username.clone(),
                    passwd: self.settings.password.clone(),
                })]
            }
            SessionEvent::Inbound(text) => {
                self.last_inbound_ms = now_ms;
                self.on_inbound(text, store, labels, now)
            }
            SessionEvent::PollTick => self.on_poll_tick(now_ms),
            SessionEvent::RequestTimeout => vec![SessionAction::Reconnect(ReconnectReason::RequestTimeout)],
            SessionEvent::WatchdogCheck => {
                if watchdog_expired(now_ms, self.last_inbound_ms, self.settings.poll_interval_secs) {
                    vec![SessionAction::Reconnect(ReconnectReason::Watchdog {
                        silent_ms: now_ms - self.last_inbound_ms,
                    })]
                } else {
                    Vec::new()
                }
            }
        };

        if actions
            .iter()
            .any(|a| matches!(a, SessionAction::Reconnect(_)))
        {
            self.phase = Phase::Reconnecting;
            self.in_flight = None;
            self.cursor = None;
            self.stages.clear();
        }
        actions
    }

    fn send(&self, request: Request) -> SessionAction {
        SessionAction::Send(Outbound {
            lang: self.settings.lang.clone(),
            token: self.token.clone(),
            request,
        })
    }

    fn on_inbound(
        &mut self,
        text: &str,
        store: &mut DeviceStatusStore,
        labels: &LabelTable,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => return self.on_unparseable(e.to_string(), now.timestamp_millis()),
        };
        debug!(
            "Inbound {} (result_code {})",
            inbound.service, inbound.result_code
        );

        match inbound.service {
            Service::Connect => self.on_connect(&inbound),
            Service::Login => self.on_login(&inbound),
            Service::DeviceList => self.on_device_list(&inbound, now.timestamp_millis()),
            Service::Real | Service::Direct | Service::RealBattery => {
                self.on_stage_reply(&inbound, store, labels, now)
            }
            Service::Notice => {
                if inbound.is_success() {
                    debug!("Ignoring notice: {}", inbound.result_msg);
                    Vec::new()
                } else {
                    vec![SessionAction::Reconnect(ReconnectReason::Notice(
                        inbound.result_msg.clone(),
                    ))]
                }
            }
            Service::Unknown => {
                debug!("Ignoring message for unknown service");
                Vec::new()
            }
        }
    }

    /// A frame that is not even an envelope. During polling it counts
    /// against the in-flight stage; otherwise the handshake is broken.
    fn on_unparseable(&mut self, error: String, now_ms: i64) -> Vec<SessionAction> {
        match self.in_flight.as_ref().map(|f| f.stage) {
            Some(Stage::Real) => vec![SessionAction::Reconnect(ReconnectReason::MalformedSnapshot(error))],
            Some(stage) => {
                warn!("Skipping {:?} update: {}", stage, error);
                self.in_flight = None;
                self.advance(now_ms)
            }
            None if self.phase == Phase::Polling => {
                warn!("Ignoring unparseable message: {}", error);
                Vec::new()
            }
            None => vec![SessionAction::Reconnect(ReconnectReason::HandshakeFailed(error))],
        }
    }

    fn on_connect(&mut self, inbound: &Inbound) -> Vec<SessionAction> {
        if self.phase != Phase::AwaitingToken {
            debug!("Unexpected connect reply in {:?}", self.phase);
            return Vec::new();
        }
        let reply: ConnectReply = match inbound.payload() {
            Ok(reply) => reply,
            Err(e) => return handshake_failed(e.to_string()),
        };
        if reply.token.is_empty() {
            return handshake_failed("connect reply without token");
        }
        info!("Connected, gateway protocol {:?}", reply.generation());
        self.token = reply.token;
        self.phase = Phase::AwaitingLogin;
        vec![self.send(Request::Login {
            username: self.settings.username.clone(),
            passwd: self.settings.password.clone(),
        })]
    }

    fn on_login(&mut self, inbound: &Inbound) -> Vec<SessionAction> {
        if self.phase != Phase::AwaitingLogin {
            debug!("Unexpected login reply in {:?}", self.phase);
            return Vec::new();
        }
        if !inbound.is_success() {
            return handshake_failed(format!(
                "login rejected ({}): {}",
                inbound.result_code, inbound.result_msg
            ));
        }
        let reply: LoginReply = match inbound.payload() {
            Ok(reply) => reply,
            Err(e) => return handshake_failed(e.to_string()),
        };
        if reply.token.is_empty() {
            return handshake_failed("login reply without token");
        }
        info!("Logged in");
        self.token = reply.token;
        self.phase = Phase::Enumerating;
        vec![self.send(Request::device_list())]
    }

    fn on_device_list(&mut self, inbound: &Inbound, now_ms: i64) -> Vec<SessionAction> {
        if self.phase != Phase::Enumerating {
            debug!("Unexpected device list in {:?}", self.phase);
            return Vec::new();
        }
        if !inbound.is_success() {
            return handshake_failed(format!("device list rejected: {}", inbound.result_msg));
        }
        let reply: DeviceListReply = match inbound.payload() {
            Ok(reply) => reply,
            Err(e) => return handshake_failed(e.to_string()),
        };

        for entry in reply.list {
            match stages_for(entry.dev_type) {
                None => {
                    warn!(
                        "Skipping device {} of unknown type {}",
                        entry.dev_sn, entry.dev_type
                    );
                    continue;
                }
                Some([]) => {
                    debug!("Skipping device {} of type {}", entry.dev_sn, entry.dev_type);
                    continue;
                }
                Some(_) => {}
            }
            let device = DeviceRecord::new(&entry.dev_id, &entry.dev_sn, &entry.dev_model, entry.dev_type);
            match self.devices.iter_mut().find(|d| d.id == device.id) {
                Some(known) => known.gateway_id = device.gateway_id,
                None => {
                    info!(
                        "Registered device {} ({}, type {})",
                        device.serial_number, device.model_name, device.type_code
                    );
                    self.devices.push(device);
                }
            }
        }

        self.phase = Phase::Polling;
        let mut actions = vec![SessionAction::StartPolling];
        actions.extend(self.start_sweep(now_ms));
        actions
    }

    fn on_stage_reply(
        &mut self,
        inbound: &Inbound,
        store: &mut DeviceStatusStore,
        labels: &LabelTable,
        now: DateTime<Utc>,
    ) -> Vec<SessionAction> {
        let Some(in_flight) = self.in_flight.clone() else {
            debug!("Ignoring {} reply with nothing in flight", inbound.service);
            return Vec::new();
        };
        if in_flight.stage.service() != inbound.service {
            debug!(
                "Ignoring {} reply while waiting for {}",
                inbound.service,
                in_flight.stage.service()
            );
            return Vec::new();
        }

        match parse_stage(inbound, in_flight.stage, labels) {
            Ok(points) => {
                for point in points {
                    store.update(
                        &in_flight.device_id,
                        &point.name,
                        point.value,
                        point.unit.as_deref(),
                        now,
                    );
                }
            }
            Err(e) if in_flight.stage == Stage::Real => {
                return vec![SessionAction::Reconnect(ReconnectReason::MalformedSnapshot(e))];
            }
            Err(e) => warn!(
                "Skipping {} update of {}: {}",
                inbound.service, in_flight.device_id, e
            ),
        }

        self.in_flight = None;
        self.advance(now.timestamp_millis())
    }

    fn on_poll_tick(&mut self, now_ms: i64) -> Vec<SessionAction> {
        if self.phase != Phase::Polling {
            return Vec::new();
        }
        if let Some(in_flight) = &self.in_flight {
            self.skipped_polls += 1;
            warn!(
                "Poll skipped, {} still in flight ({}/{})",
                in_flight.device_id, self.skipped_polls, MAX_SKIPPED_POLLS
            );
            if self.skipped_polls >= MAX_SKIPPED_POLLS {
                return vec![SessionAction::Reconnect(ReconnectReason::TooManySkippedPolls(
                    self.skipped_polls,
                ))];
            }
            return Vec::new();
        }
        self.skipped_polls = 0;
        self.start_sweep(now_ms)
    }

    fn start_sweep(&mut self, now_ms: i64) -> Vec<SessionAction> {
        self.cursor = None;
        self.stages.clear();
        self.advance(now_ms)
    }

    /// Issue the next request of the sweep, or complete it.
    fn advance(&mut self, now_ms: i64) -> Vec<SessionAction> {
        loop {
            if let (Some(stage), Some(index)) = (self.stages.pop_front(), self.cursor) {
                let device = &self.devices[index];
                let request = stage.request(&device.gateway_id, now_ms);
                self.in_flight = Some(InFlight {
                    device_id: device.id.clone(),
                    stage,
                });
                return vec![self.send(request)];
            }

            let next = self.cursor.map_or(0, |c| c + 1);
            match self.devices.get(next) {
                Some(device) => {
                    self.cursor = Some(next);
                    self.stages = stages_for(device.type_code)
                        .unwrap_or_default()
                        .iter()
                        .copied()
                        .collect();
                }
                None => {
                    self.cursor = None;
                    return vec![SessionAction::SweepComplete];
                }
            }
        }
    }
}

fn handshake_failed(message: impl Into<String>) -> Vec<SessionAction> {
    vec![SessionAction::Reconnect(ReconnectReason::HandshakeFailed(
        message.into(),
    ))]
}

fn parse_stage(inbound: &Inbound, stage: Stage, labels: &LabelTable) -> Result<Vec<PointUpdate>, String> {
    if !inbound.is_success() {
        return Err(format!(
            "result_code {}: {}",
            inbound.result_code, inbound.result_msg
        ));
    }
    match stage {
        Stage::Real | Stage::RealBattery => inbound
            .payload::<RealReply>()
            .map(|reply| real_points(&reply, labels))
            .map_err(|e| e.to_string()),
        Stage::Direct => inbound
            .payload::<DirectReply>()
            .map(|reply| direct_points(&reply, labels))
            .map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn settings() -> SessionSettings {
        SessionSettings {
            lang: "en_us".into(),
            username: "admin".into(),
            password: "pw8888".into(),
            poll_interval_secs: 10,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        state: SessionState,
        store: DeviceStatusStore,
        labels: LabelTable,
        now: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let mut state = SessionState::new(settings());
            state.reset(t0());
            Self {
                state,
                store: DeviceStatusStore::new(),
                labels: LabelTable::default(),
                now: t0(),
            }
        }

        fn event(&mut self, event: SessionEvent<'_>) -> Vec<SessionAction> {
            self.state
                .handle(event, &mut self.store, &self.labels, self.now)
        }

        fn inbound(&mut self, text: &str) -> Vec<SessionAction> {
            self.event(SessionEvent::Inbound(text))
        }

        /// Drive the handshake up to and including the device list.
        fn enumerate(&mut self, devices: &str) -> Vec<SessionAction> {
            self.event(SessionEvent::Opened);
            self.inbound(r#"{"result_code":1,"result_data":{"service":"connect","token":"t1","forceModifyPasswd":false}}"#);
            self.inbound(r#"{"result_code":1,"result_data":{"service":"login","token":"t2"}}"#);
            self.inbound(&format!(
                r#"{{"result_code":1,"result_data":{{"service":"devicelist","list":{}}}}}"#,
                devices
            ))
        }
    }

    fn sent(actions: &[SessionAction]) -> Vec<&Request> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(out) => Some(&out.request),
                _ => None,
            })
            .collect()
    }

    fn reconnects(actions: &[SessionAction]) -> bool {
        actions
            .iter()
            .any(|a| matches!(a, SessionAction::Reconnect(_)))
    }

    const STRING_INVERTER: &str =
        r#"[{"dev_id":1,"dev_sn":"A22-01","dev_model":"SG50RS","dev_type":21}]"#;

    const REAL_OK: &str = r#"{"result_code":1,"result_data":{"service":"real","list":[
        {"data_name":"I18N_COMMON_TOTAL_DCPOWER","data_value":"5.2","data_unit":"kW"}]}}"#;

    const DIRECT_OK: &str = r#"{"result_code":1,"result_data":{"service":"direct","list":[
        {"name":"MPPT1","voltage":"600","voltage_unit":"V","current":"2","current_unit":"A"}]}}"#;

    #[test]
    fn test_full_flow() {
        let mut h = Harness::new();

        let actions = h.event(SessionEvent::Opened);
        assert!(matches!(sent(&actions)[0], Request::Connect { .. }));
        assert_eq!(h.state.phase(), Phase::AwaitingToken);

        let actions = h.inbound(r#"{"result_code":1,"result_data":{"service":"connect","token":"t1"}}"#);
        let SessionAction::Send(login) = &actions[0] else {
            panic!("expected login, got {:?}", actions)
        };
        assert!(matches!(login.request, Request::Login { .. }));
        assert_eq!(login.token, "t1");

        let actions = h.inbound(r#"{"result_code":1,"result_data":{"service":"login","token":"t2"}}"#);
        assert!(matches!(sent(&actions)[0], Request::DeviceList { .. }));
        assert_eq!(h.state.phase(), Phase::Enumerating);

        let actions = h.inbound(&format!(
            r#"{{"result_code":1,"result_data":{{"service":"devicelist","list":{}}}}}"#,
            STRING_INVERTER
        ));
        assert_eq!(actions[0], SessionAction::StartPolling);
        match sent(&actions)[0] {
            Request::Real { dev_id, .. } => assert_eq!(dev_id, "1"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.state.devices()[0].id, "A2201");

        let actions = h.inbound(REAL_OK);
        assert!(matches!(sent(&actions)[0], Request::Direct { .. }));
        let point = h.store.point("A2201", "i18n_common_total_dcpower").unwrap();
        assert!(point.dirty);

        let actions = h.inbound(DIRECT_OK);
        assert_eq!(actions, vec![SessionAction::SweepComplete]);
        assert!(h.store.point("A2201", "mppt_total_power").is_some());
        assert!(h.state.in_flight().is_none());

        // next tick starts a new sweep
        let actions = h.event(SessionEvent::PollTick);
        assert!(matches!(sent(&actions)[0], Request::Real { .. }));
    }

    #[test]
    fn test_empty_stage_types_are_never_registered() {
        let mut h = Harness::new();
        let actions = h.enumerate(
            r#"[{"dev_id":1,"dev_sn":"M1","dev_model":"METER","dev_type":0},
                {"dev_id":2,"dev_sn":"X1","dev_model":"??","dev_type":99},
                {"dev_id":3,"dev_sn":"H1","dev_model":"SH10RT","dev_type":35}]"#,
        );

        let ids: Vec<_> = h.state.devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["H1"]);
        match sent(&actions)[0] {
            Request::Real { dev_id, .. } => assert_eq!(dev_id, "3"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_devices_completes_sweep_immediately() {
        let mut h = Harness::new();
        let actions = h.enumerate("[]");
        assert_eq!(
            actions,
            vec![SessionAction::StartPolling, SessionAction::SweepComplete]
        );
    }

    #[test]
    fn test_hybrid_stage_order() {
        let mut h = Harness::new();
        h.enumerate(r#"[{"dev_id":3,"dev_sn":"H1","dev_model":"SH10RT","dev_type":35}]"#);
        assert_eq!(h.state.in_flight().unwrap().stage, Stage::Real);

        let actions = h.inbound(REAL_OK);
        assert!(matches!(sent(&actions)[0], Request::RealBattery { .. }));
        let actions = h.inbound(r#"{"result_code":1,"result_data":{"service":"real_battery","list":[]}}"#);
        assert!(matches!(sent(&actions)[0], Request::Direct { .. }));
    }

    #[test]
    fn test_devices_registered_once() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        h.state.reset(h.now);
        h.enumerate(STRING_INVERTER);
        assert_eq!(h.state.devices().len(), 1);
    }

    #[test]
    fn test_missing_token_reconnects() {
        let mut h = Harness::new();
        h.event(SessionEvent::Opened);
        let actions = h.inbound(r#"{"result_code":1,"result_data":{"service":"connect"}}"#);
        assert!(reconnects(&actions));
        assert_eq!(h.state.phase(), Phase::Reconnecting);
    }

    #[test]
    fn test_login_failure_reconnects() {
        let mut h = Harness::new();
        h.event(SessionEvent::Opened);
        h.inbound(r#"{"result_code":1,"result_data":{"service":"connect","token":"t1"}}"#);
        let actions = h.inbound(
            r#"{"result_code":104,"result_msg":"wrong password","result_data":{"service":"login","token":"t2"}}"#,
        );
        assert!(reconnects(&actions));
    }

    #[test]
    fn test_malformed_snapshot_reconnects() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        let actions = h.inbound(r#"{"result_code":1,"result_data":{"service":"real","list":"oops"}}"#);
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Reconnect(ReconnectReason::MalformedSnapshot(_))]
        ));
        assert!(h.state.in_flight().is_none());
    }

    #[test]
    fn test_malformed_breakdown_skips_update() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        h.inbound(REAL_OK);
        let actions = h.inbound(r#"{"result_code":1,"result_data":{"service":"direct","list":"oops"}}"#);
        assert_eq!(actions, vec![SessionAction::SweepComplete]);
        assert_eq!(h.state.phase(), Phase::Polling);
    }

    #[test]
    fn test_skipped_polls_force_reconnect() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);

        for n in 1..MAX_SKIPPED_POLLS {
            assert!(h.event(SessionEvent::PollTick).is_empty());
            assert_eq!(h.state.skipped_polls(), n);
        }
        let actions = h.event(SessionEvent::PollTick);
        assert_eq!(
            actions,
            vec![SessionAction::Reconnect(ReconnectReason::TooManySkippedPolls(
                MAX_SKIPPED_POLLS
            ))]
        );
    }

    #[test]
    fn test_skip_counter_resets_after_sweep() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        h.event(SessionEvent::PollTick);
        assert_eq!(h.state.skipped_polls(), 1);
        h.inbound(REAL_OK);
        h.inbound(DIRECT_OK);
        h.event(SessionEvent::PollTick);
        assert_eq!(h.state.skipped_polls(), 0);
    }

    #[test]
    fn test_watchdog_boundary() {
        assert!(!watchdog_expired(60_000, 0, 10));
        assert!(watchdog_expired(60_001, 0, 10));
        // absurd intervals saturate instead of overflowing
        assert!(!watchdog_expired(i64::MAX, 0, u64::MAX));

        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        h.now = t0() + Duration::milliseconds(60_000);
        assert!(h.event(SessionEvent::WatchdogCheck).is_empty());
        h.now = t0() + Duration::milliseconds(60_001);
        assert!(reconnects(&h.event(SessionEvent::WatchdogCheck)));
    }

    #[test]
    fn test_inbound_feeds_watchdog() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        h.now = t0() + Duration::seconds(50);
        h.inbound(REAL_OK);
        h.now = t0() + Duration::seconds(100);
        assert!(h.event(SessionEvent::WatchdogCheck).is_empty());
        assert_eq!(h.state.last_inbound_ms(), (t0() + Duration::seconds(50)).timestamp_millis());
    }

    #[test]
    fn test_notice_handling() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        assert!(h
            .inbound(r#"{"result_code":1,"result_data":{"service":"notice"}}"#)
            .is_empty());
        let actions = h.inbound(
            r#"{"result_code":100,"result_msg":"normal user limit","result_data":{"service":"notice"}}"#,
        );
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Reconnect(ReconnectReason::Notice(_))]
        ));
    }

    #[test]
    fn test_request_timeout_reconnects() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        assert!(reconnects(&h.event(SessionEvent::RequestTimeout)));
        assert!(h.state.in_flight().is_none());
    }

    #[test]
    fn test_stale_reply_is_ignored() {
        let mut h = Harness::new();
        h.enumerate(STRING_INVERTER);
        assert!(h.inbound(DIRECT_OK).is_empty());
        assert_eq!(h.state.in_flight().unwrap().stage, Stage::Real);
    }
}
