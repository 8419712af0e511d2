#![no_main]

//! Parse arbitrary response PDUs against arbitrary read requests.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use winet_bridge::pdu::ModbusPdu;
use winet_bridge::{ReadRequest, RegisterKind};

#[derive(Debug, Arbitrary)]
struct Input {
    holding: bool,
    address: u16,
    quantity: u16,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let kind = if input.holding {
        RegisterKind::Holding
    } else {
        RegisterKind::Input
    };
    let Ok(request) = ReadRequest::new(1, kind, input.address, input.quantity) else {
        return;
    };
    if let Ok(pdu) = ModbusPdu::from_slice(&input.body) {
        if let Ok(words) = pdu.parse_registers(&request) {
            assert_eq!(words.len(), request.quantity as usize);
        }
    }
});
