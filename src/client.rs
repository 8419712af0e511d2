//! Register client
//!
//! [`RegisterRead`] is the seam used by the meter reader and the discovery
//! engine: "read N words of a given table at an address". The production
//! implementation, [`GenericRegisterClient`], binds a transport to a fixed
//! unit id; tests substitute scripted readers.
//!
//! ```rust,no_run
//! use winet_bridge::{ModbusTcpClient, RegisterKind, RegisterRead, BridgeResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> BridgeResult<()> {
//!     let mut client = ModbusTcpClient::tcp("192.168.1.20:502", 1, Duration::from_secs(5));
//!     let words = client.read_registers(RegisterKind::Input, 5600, 1).await?;
//!     println!("meter power word: {:?}", words);
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::BridgeResult;
use crate::protocol::{ReadRequest, RegisterKind, UnitId};
use crate::transport::{ModbusTransport, TcpTransport, TransportStats};

/// Addressed register reads against one device.
pub trait RegisterRead: Send {
    /// Read `quantity` words of `kind` starting at `address`.
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = BridgeResult<Vec<u16>>> + Send;

    /// Drop the underlying connection; the next read reconnects.
    fn disconnect(&mut self) -> impl Future<Output = BridgeResult<()>> + Send;

    fn is_connected(&self) -> bool;
}

/// Register client over any transport, bound to one unit id.
pub struct GenericRegisterClient<T: ModbusTransport> {
    transport: T,
    unit_id: UnitId,
}

/// Register client over Modbus TCP
pub type ModbusTcpClient = GenericRegisterClient<TcpTransport>;

impl<T: ModbusTransport> GenericRegisterClient<T> {
    pub fn new(transport: T, unit_id: UnitId) -> Self {
        Self { transport, unit_id }
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

impl GenericRegisterClient<TcpTransport> {
    /// Client for `host:port`; connects on first read.
    pub fn tcp(address: impl Into<String>, unit_id: UnitId, timeout: Duration) -> Self {
        Self::new(TcpTransport::new(address, timeout), unit_id)
    }
}

impl<T: ModbusTransport> RegisterRead for GenericRegisterClient<T> {
    async fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        quantity: u16,
    ) -> BridgeResult<Vec<u16>> {
        let request = ReadRequest::new(self.unit_id, kind, address, quantity)?;
        let words = self.transport.request(&request).await?;
        debug!(
            "Read {} {} register(s) at {} from unit {}: {:04X?}",
            quantity, kind, address, self.unit_id, words
        );
        Ok(words)
    }

    async fn disconnect(&mut self) -> BridgeResult<()> {
        self.transport.close().await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock transport recording requests and replaying queued responses
    struct MockTransport {
        requests: Mutex<Vec<ReadRequest>>,
        responses: Mutex<VecDeque<BridgeResult<Vec<u16>>>>,
        connected: Mutex<bool>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                connected: Mutex::new(true),
            }
        }

        fn add_response(&self, response: BridgeResult<Vec<u16>>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn get_requests(&self) -> Vec<ReadRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ModbusTransport for MockTransport {
        fn request(
            &mut self,
            request: &ReadRequest,
        ) -> impl Future<Output = BridgeResult<Vec<u16>>> + Send {
            self.requests.lock().unwrap().push(*request);
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BridgeError::connection("No response prepared in mock")));
            async move { response }
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock().unwrap()
        }

        fn close(&mut self) -> impl Future<Output = BridgeResult<()>> + Send {
            *self.connected.lock().unwrap() = false;
            async { Ok(()) }
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    #[tokio::test]
    async fn test_read_uses_bound_unit_id() {
        let mock = MockTransport::new();
        mock.add_response(Ok(vec![0x0000, 0x3039]));

        let mut client = GenericRegisterClient::new(mock, 7);
        let words = client
            .read_registers(RegisterKind::Input, 5098, 2)
            .await
            .unwrap();

        assert_eq!(words, vec![0x0000, 0x3039]);
        let requests = client.transport().get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].unit_id, 7);
        assert_eq!(requests[0].kind, RegisterKind::Input);
        assert_eq!(requests[0].address, 5098);
        assert_eq!(requests[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_invalid_quantity_never_reaches_transport() {
        let mut client = GenericRegisterClient::new(MockTransport::new(), 1);
        let result = client.read_registers(RegisterKind::Holding, 0, 0).await;

        assert!(matches!(result, Err(BridgeError::InvalidData { .. })));
        assert!(client.transport().get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_error_propagation_and_disconnect() {
        let mock = MockTransport::new();
        mock.add_response(Err(BridgeError::timeout("Simulated timeout", 1000)));

        let mut client = GenericRegisterClient::new(mock, 1);
        let result = client.read_registers(RegisterKind::Input, 5600, 1).await;
        assert!(matches!(result, Err(BridgeError::Timeout { .. })));

        assert!(client.is_connected());
        tokio_test::assert_ok!(client.disconnect().await);
        assert!(!client.is_connected());
    }
}
