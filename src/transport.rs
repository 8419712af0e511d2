//! Register protocol transport
//!
//! [`ModbusTransport`] abstracts "send one read request, get the register
//! words back" so the client logic can be tested against an in-memory
//! transport. [`TcpTransport`] implements it over Modbus TCP (MBAP framing)
//! and connects lazily: a dropped link is re-dialed by the next request.

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{BridgeError, BridgeResult};
use crate::pdu::ModbusPdu;
use crate::protocol::ReadRequest;

/// Counters kept by a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub connects: u64,
}

/// One register-protocol link.
pub trait ModbusTransport: Send {
    /// Send a read request and return the decoded register words.
    fn request(
        &mut self,
        request: &ReadRequest,
    ) -> impl Future<Output = BridgeResult<Vec<u16>>> + Send;

    /// Whether a link is currently open.
    fn is_connected(&self) -> bool;

    /// Drop the link; the next request reconnects.
    fn close(&mut self) -> impl Future<Output = BridgeResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Modbus TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    timeout: Duration,
    stream: Option<TcpStream>,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create a transport for `host:port`. No connection is made yet.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            stream: None,
            transaction_id: 0,
            stats: TransportStats::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn ensure_connected(&mut self) -> BridgeResult<&mut TcpStream> {
        if self.stream.is_none() {
            debug!("Connecting to register endpoint {}", self.address);
            let stream = timeout(self.timeout, TcpStream::connect(&self.address))
                .await
                .map_err(|_| {
                    BridgeError::timeout(
                        format!("connect {}", self.address),
                        self.timeout.as_millis() as u64,
                    )
                })?
                .map_err(|e| BridgeError::connection(format!("{}: {}", self.address, e)))?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {e}");
            }
            self.stats.connects += 1;
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| BridgeError::connection("not connected"))
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    async fn exchange(&mut self, request: &ReadRequest) -> BridgeResult<Vec<u16>> {
        let pdu = ModbusPdu::read_request(request)?;
        let transaction_id = self.next_transaction_id();
        let frame = encode_frame(transaction_id, request.unit_id, &pdu);
        let op_timeout = self.timeout;

        let stream = self.ensure_connected().await?;
        write_frame(stream, &frame, op_timeout).await?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        timeout(op_timeout, stream.read_exact(&mut header))
            .await
            .map_err(|_| {
                BridgeError::timeout(
                    format!("read {} registers at {}", request.kind, request.address),
                    op_timeout.as_millis() as u64,
                )
            })??;

        let (length, response_tid) = decode_header(&header)?;
        if response_tid != transaction_id {
            return Err(BridgeError::protocol(format!(
                "Transaction id mismatch: sent {}, got {}",
                transaction_id, response_tid
            )));
        }

        // length counts the unit id already consumed with the header
        let mut body = vec![0u8; length - 1];
        timeout(op_timeout, stream.read_exact(&mut body))
            .await
            .map_err(|_| BridgeError::timeout("read response body", op_timeout.as_millis() as u64))??;

        debug!(
            "Response frame: tid={} unit={} pdu={:02X?}",
            response_tid, header[6], body
        );
        ModbusPdu::from_slice(&body)?.parse_registers(request)
    }
}

/// Build an MBAP frame around `pdu`.
fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.put_u16(transaction_id);
    frame.put_u16(0);
    frame.put_u16((pdu.len() + 1) as u16);
    frame.put_u8(unit_id);
    frame.put_slice(pdu.as_slice());
    frame
}

/// Write a whole frame within `op_timeout`.
async fn write_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    frame: &[u8],
    op_timeout: Duration,
) -> BridgeResult<()> {
    timeout(op_timeout, stream.write_all(frame))
        .await
        .map_err(|_| BridgeError::timeout("write request frame", op_timeout.as_millis() as u64))??;
    Ok(())
}

/// Validate an MBAP header, returning (length field, transaction id).
fn decode_header(header: &[u8; MBAP_HEADER_LEN]) -> BridgeResult<(usize, u16)> {
    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;

    if protocol_id != 0 {
        return Err(BridgeError::protocol(format!(
            "Invalid protocol id: {}",
            protocol_id
        )));
    }
    if length < 2 || length > MAX_MBAP_LENGTH {
        return Err(BridgeError::protocol(format!(
            "Invalid MBAP length: {}",
            length
        )));
    }
    Ok((length, transaction_id))
}

impl ModbusTransport for TcpTransport {
    async fn request(&mut self, request: &ReadRequest) -> BridgeResult<Vec<u16>> {
        self.stats.requests_sent += 1;
        match self.exchange(request).await {
            Ok(words) => {
                self.stats.responses_received += 1;
                Ok(words)
            }
            Err(e) => {
                self.stats.errors += 1;
                if matches!(e, BridgeError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                if e.is_transport() {
                    // the stream may hold a half-read frame
                    self.stream = None;
                }
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> BridgeResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats
    }
}
