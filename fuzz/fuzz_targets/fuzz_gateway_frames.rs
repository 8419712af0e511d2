#![no_main]

//! Feed arbitrary text frames through the session state machine in every
//! phase it can reach. Nothing may panic.

use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use winet_bridge::session::{SessionEvent, SessionSettings, SessionState};
use winet_bridge::{DeviceStatusStore, LabelTable};

const HANDSHAKE: [&str; 3] = [
    r#"{"result_code":1,"result_data":{"service":"connect","token":"t1"}}"#,
    r#"{"result_code":1,"result_data":{"service":"login","token":"t2"}}"#,
    r#"{"result_code":1,"result_data":{"service":"devicelist","list":[
        {"dev_id":1,"dev_sn":"A1","dev_model":"SH10RT","dev_type":35}]}}"#,
];

fuzz_target!(|frames: Vec<String>| {
    let labels = LabelTable::default();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    for depth in 0..=HANDSHAKE.len() {
        let mut state = SessionState::new(SessionSettings {
            lang: "en_us".into(),
            username: "admin".into(),
            password: "pw".into(),
            poll_interval_secs: 10,
        });
        let mut store = DeviceStatusStore::new();
        state.reset(now);
        state.handle(SessionEvent::Opened, &mut store, &labels, now);
        for frame in &HANDSHAKE[..depth] {
            state.handle(SessionEvent::Inbound(frame), &mut store, &labels, now);
        }
        for frame in &frames {
            state.handle(SessionEvent::Inbound(frame), &mut store, &labels, now);
        }
    }
});
