//! End-to-end session tests against a mock gateway and a mock meter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use winet_bridge::config::GatewayConfig;
use winet_bridge::{
    DeviceRecord, DeviceStatusStore, GatewaySession, LabelTable, MeterReader, ModbusTcpClient,
    PointValue, RegisterCatalog, RegisterMapResolver,
};

type Snapshot = HashMap<String, Option<PointValue>>;

fn reply(data: Value) -> Message {
    Message::Text(json!({"result_code": 1, "result_msg": "success", "result_data": data}).to_string())
}

/// Serve one gateway connection: handshake, one string inverter, fixed
/// readings. With `reject_login` the login is refused.
async fn serve_gateway(listener: &TcpListener, reject_login: bool) {
    let (socket, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(socket).await.unwrap();

    while let Some(Ok(frame)) = ws.next().await {
        let Message::Text(text) = frame else { continue };
        let request: Value = serde_json::from_str(&text).unwrap();
        let response = match request["service"].as_str().unwrap() {
            "connect" => reply(json!({"service": "connect", "token": "t-connect", "tips_disable": 0})),
            "login" if reject_login => Message::Text(
                json!({"result_code": 106, "result_msg": "wrong password", "result_data": {"service": "login"}})
                    .to_string(),
            ),
            "login" => {
                assert_eq!(request["token"], "t-connect");
                reply(json!({"service": "login", "token": "t-login"}))
            }
            "devicelist" => reply(json!({"service": "devicelist", "list": [
                {"dev_id": 1, "dev_sn": "A2207123456", "dev_model": "SG50RS", "dev_type": 21},
                {"dev_id": 2, "dev_sn": "X0", "dev_model": "WiNet-S", "dev_type": 0}
            ]})),
            "real" => {
                assert_eq!(request["token"], "t-login");
                assert_eq!(request["dev_id"], "1");
                reply(json!({"service": "real", "list": [
                    {"data_name": "I18N_COMMON_TOTAL_DCPOWER", "data_value": "5.21", "data_unit": "kW"},
                    {"data_name": "I18N_COMMON_DEVICE_STATUS", "data_value": "I18N_COMMON_RUNNING", "data_unit": ""}
                ]}))
            }
            "direct" => reply(json!({"service": "direct", "list": [
                {"name": "MPPT1", "voltage": "600.0", "voltage_unit": "V", "current": "3.5", "current_unit": "A"},
                {"name": "MPPT2", "voltage": 610.1, "current": 2.5}
            ]})),
            other => panic!("unexpected service {}", other),
        };
        if ws.send(response).await.is_err() {
            break;
        }
    }
}

/// Answer FC04 reads from a fixed register table, zero elsewhere.
async fn serve_meter(listener: TcpListener, registers: HashMap<u16, u16>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut request = [0u8; 12];
    while socket.read_exact(&mut request).await.is_ok() {
        let address = u16::from_be_bytes([request[8], request[9]]);
        let quantity = u16::from_be_bytes([request[10], request[11]]);
        let byte_count = (quantity * 2) as u8;

        let mut frame = vec![request[0], request[1], 0, 0];
        frame.extend_from_slice(&(3 + byte_count as u16).to_be_bytes());
        frame.extend_from_slice(&[request[6], request[7], byte_count]);
        for offset in 0..quantity {
            let word = registers.get(&(address + offset)).copied().unwrap_or(0);
            frame.extend_from_slice(&word.to_be_bytes());
        }
        socket.write_all(&frame).await.unwrap();
    }
}

fn gateway_config(port: u16, poll_secs: u64) -> GatewayConfig {
    let mut config = GatewayConfig::new("127.0.0.1")
        .with_port(port)
        .with_poll_interval_secs(poll_secs);
    config.path = "/".to_string();
    config
}

fn labels() -> Arc<LabelTable> {
    let mut labels = LabelTable::default();
    labels.insert("I18N_COMMON_TOTAL_DCPOWER", "Total DC Power");
    labels.insert("I18N_COMMON_DEVICE_STATUS", "Device Status");
    labels.insert("I18N_COMMON_RUNNING", "Running");
    Arc::new(labels)
}

fn snapshot_publisher(
    tx: mpsc::UnboundedSender<(Vec<DeviceRecord>, Snapshot)>,
) -> impl FnMut(&[DeviceRecord], &mut DeviceStatusStore) + Send {
    move |devices: &[DeviceRecord], store: &mut DeviceStatusStore| {
        let mut snapshot = Snapshot::new();
        for device in devices {
            for point in store.dirty_points(&device.id) {
                snapshot.insert(point.slug.clone(), point.value.clone());
            }
            store.mark_device_delivered(&device.id);
        }
        let _ = tx.send((devices.to_vec(), snapshot));
    }
}

#[tokio::test]
async fn test_first_sweep_is_published() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let gateway = tokio::spawn(async move { serve_gateway(&listener, false).await });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session: GatewaySession<_> =
        GatewaySession::new(gateway_config(port, 30), labels(), snapshot_publisher(tx));

    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { session.run(shutdown).await });

    let (devices, snapshot) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no sweep published")
        .unwrap();

    // type 0 devices are never registered
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "A2207123456");
    assert_eq!(devices[0].base_model, "SG50RS");

    assert_eq!(snapshot["total_dc_power"], Some(PointValue::Number(5.21)));
    assert_eq!(snapshot["device_status"], Some(PointValue::Text("Running".into())));
    assert_eq!(snapshot["mppt1_power"], Some(PointValue::Number(2100.0)));
    assert_eq!(snapshot["mppt_total_power"], Some(PointValue::Number(3625.25)));

    stop.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("session did not stop")
        .unwrap();
    assert!(result.is_ok());
    gateway.abort();
}

#[tokio::test]
async fn test_meter_points_are_merged_into_sweep() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let gateway = tokio::spawn(async move { serve_gateway(&listener, false).await });

    let meter_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let meter_addr = meter_listener.local_addr().unwrap();
    let registers = HashMap::from([
        (5600, (-850i16) as u16),
        // 5234.5 kWh, low word first
        (5098, 52345),
        (5099, 0),
        // 812.3 kWh
        (5094, 8123),
        (5095, 0),
    ]);
    let meter_server = tokio::spawn(serve_meter(meter_listener, registers));

    let catalog = Arc::new(RegisterCatalog::builtin().unwrap());
    let client = ModbusTcpClient::tcp(meter_addr.to_string(), 1, Duration::from_secs(2));
    let reader = MeterReader::new(client, RegisterMapResolver::new(catalog))
        .unwrap()
        .with_target_serial("A2207123456");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session: GatewaySession<_> =
        GatewaySession::new(gateway_config(port, 30), labels(), snapshot_publisher(tx))
            .with_meter(Arc::new(Mutex::new(reader)));

    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { session.run(shutdown).await });

    let (_, snapshot) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no sweep published")
        .unwrap();

    assert_eq!(snapshot["meter_active_power"], Some(PointValue::Number(-850.0)));
    let import = snapshot["grid_import_energy"].as_ref().and_then(PointValue::as_f64).unwrap();
    assert!((import - 5234.5).abs() < 1e-6);
    let export = snapshot["grid_export_energy"].as_ref().and_then(PointValue::as_f64).unwrap();
    assert!((export - 812.3).abs() < 1e-6);
    // gateway points are still there
    assert!(snapshot.contains_key("total_dc_power"));

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("session did not stop")
        .unwrap()
        .unwrap();
    gateway.abort();
    meter_server.abort();
}

#[tokio::test]
async fn test_rejected_login_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    let gateway = tokio::spawn(async move {
        loop {
            serve_gateway(&listener, true).await;
            if accepted_tx.send(()).is_err() {
                break;
            }
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    // one second polls give a three second reconnect delay
    let mut session: GatewaySession<_> =
        GatewaySession::new(gateway_config(port, 1), labels(), snapshot_publisher(tx));
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { session.run(shutdown).await });

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(10), accepted_rx.recv())
            .await
            .expect("session did not reconnect")
            .unwrap();
    }
    assert!(rx.try_recv().is_err());

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("session did not stop")
        .unwrap()
        .unwrap();
    gateway.abort();
}
