//! Transport abstraction (spec §6, §9 Design Notes).
//!
//! A single `Transport` trait covers both the real USB-backed implementation
//! (owned by a caller, outside this crate) and the in-memory
//! [`VirtualTransport`] used by this crate's own tests — a tagged interface
//! handle rather than multi-inheritance, per the spec's re-architecture note.

use crate::error::{Endpoint, MtpError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A bus-enumerated device, before it has been opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_id: String,
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
    pub speed: UsbSpeed,
}

/// Negotiated USB speed class, used to raise the `maxChunkBytes` floor
/// (spec §4.3 / §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    Full,
    High,
    Super,
}

impl UsbSpeed {
    pub fn chunk_floor(self) -> u32 {
        match self {
            Self::Full | Self::High => crate::quirks::MIN_CHUNK_BYTES_HI_SPEED,
            Self::Super => crate::quirks::MIN_CHUNK_BYTES_SUPER_SPEED,
        }
    }
}

/// A claimed device, ready for bulk/interrupt I/O. Exclusively owned by the
/// device actor; no external mutation (spec §5 Shared resources).
pub trait TransportHandle: Send {
    fn bulk_in(&mut self, timeout_ms: u32) -> Result<Vec<u8>, MtpError>;
    fn bulk_out(&mut self, data: &[u8], timeout_ms: u32) -> Result<(), MtpError>;
    fn interrupt(&mut self, timeout_ms: u32) -> Result<Option<Vec<u8>>, MtpError>;
    fn clear_halt(&mut self, endpoint: Endpoint) -> Result<(), MtpError>;
    fn reset(&mut self) -> Result<(), MtpError>;
    fn close(&mut self);
    fn speed(&self) -> UsbSpeed;
    fn max_packet_size(&self) -> usize;
}

/// Enumerates and opens devices. Implemented by the USB-backed collaborator
/// in production, and by [`VirtualTransport`] in this crate's own tests.
pub trait Transport: Send {
    fn enumerate(&self) -> Result<Vec<DeviceSummary>, MtpError>;
    fn open(&self, device_id: &str, require_kernel_detach: bool) -> Result<Box<dyn TransportHandle>, MtpError>;
}

/// A scripted fault the virtual transport should inject on a matching bulk
/// operation, consumed after it fires once.
#[derive(Debug, Clone)]
pub enum InjectedFault {
    StallBulkIn { after_bytes: usize },
    StallBulkOut,
    TimeoutBulkIn,
    TimeoutBulkOut,
    Disconnect,
}

struct VirtualState {
    bulk_in_queue: VecDeque<Vec<u8>>,
    bulk_out_log: Vec<Vec<u8>>,
    faults: VecDeque<InjectedFault>,
    halts_cleared: Vec<Endpoint>,
    bytes_delivered_since_stall: usize,
    connected: bool,
}

/// An in-memory device double: the "two implementations behind a tagged
/// interface handle" called for by spec §9's Design Notes, used by this
/// crate's own integration tests (scenarios S1-S6) without any real USB
/// hardware.
pub struct VirtualTransport {
    state: Arc<Mutex<VirtualState>>,
    summary: DeviceSummary,
    max_packet_size: usize,
}

impl VirtualTransport {
    pub fn new(summary: DeviceSummary) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                bulk_in_queue: VecDeque::new(),
                bulk_out_log: Vec::new(),
                faults: VecDeque::new(),
                halts_cleared: Vec::new(),
                bytes_delivered_since_stall: 0,
                connected: true,
            })),
            summary,
            max_packet_size: 512,
        }
    }

    /// Queues a reply to be returned by the next `bulk_in` call.
    pub fn push_reply(&self, bytes: Vec<u8>) {
        self.state.lock().unwrap().bulk_in_queue.push_back(bytes);
    }

    /// Queues a scripted fault to fire on the next matching operation.
    pub fn inject_fault(&self, fault: InjectedFault) {
        self.state.lock().unwrap().faults.push_back(fault);
    }

    /// Every byte sequence this transport has seen on bulk-OUT, in order.
    pub fn bulk_out_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().bulk_out_log.clone()
    }

    pub fn halts_cleared(&self) -> Vec<Endpoint> {
        self.state.lock().unwrap().halts_cleared.clone()
    }

    pub fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }
}

impl Transport for VirtualTransport {
    fn enumerate(&self) -> Result<Vec<DeviceSummary>, MtpError> {
        Ok(vec![self.summary.clone()])
    }

    fn open(&self, device_id: &str, _require_kernel_detach: bool) -> Result<Box<dyn TransportHandle>, MtpError> {
        if device_id != self.summary.device_id {
            return Err(MtpError::NoDevice);
        }
        Ok(Box::new(VirtualHandle { shared: Arc::clone(&self.state), max_packet_size: self.max_packet_size, speed: self.summary.speed }))
    }
}

/// A handle into the shared virtual device state, reference-counted so it
/// may outlive neither more nor less than the `VirtualTransport` it came from.
struct VirtualHandle {
    shared: Arc<Mutex<VirtualState>>,
    max_packet_size: usize,
    speed: UsbSpeed,
}

impl VirtualHandle {
    fn state(&self) -> &Mutex<VirtualState> {
        &self.shared
    }
}

impl TransportHandle for VirtualHandle {
    fn bulk_in(&mut self, _timeout_ms: u32) -> Result<Vec<u8>, MtpError> {
        let mut s = self.state().lock().unwrap();
        if !s.connected {
            return Err(MtpError::NoDevice);
        }
        if let Some(fault) = s.faults.front().cloned() {
            match fault {
                InjectedFault::StallBulkIn { after_bytes } if s.bytes_delivered_since_stall >= after_bytes => {
                    s.faults.pop_front();
                    return Err(MtpError::TransportStall { endpoint: Endpoint::BulkIn });
                }
                InjectedFault::TimeoutBulkIn => {
                    s.faults.pop_front();
                    return Err(MtpError::TimeoutInPhase { phase: crate::error::TransactionPhase::BulkIn });
                }
                InjectedFault::Disconnect => {
                    s.faults.pop_front();
                    s.connected = false;
                    return Err(MtpError::NoDevice);
                }
                _ => {}
            }
        }
        let chunk = s.bulk_in_queue.pop_front().unwrap_or_default();
        s.bytes_delivered_since_stall += chunk.len();
        Ok(chunk)
    }

    fn bulk_out(&mut self, data: &[u8], _timeout_ms: u32) -> Result<(), MtpError> {
        let mut s = self.state().lock().unwrap();
        if !s.connected {
            return Err(MtpError::NoDevice);
        }
        if let Some(fault) = s.faults.front().cloned() {
            match fault {
                InjectedFault::StallBulkOut => {
                    s.faults.pop_front();
                    return Err(MtpError::TransportStall { endpoint: Endpoint::BulkOut });
                }
                InjectedFault::TimeoutBulkOut => {
                    s.faults.pop_front();
                    return Err(MtpError::TimeoutInPhase { phase: crate::error::TransactionPhase::BulkOut });
                }
                _ => {}
            }
        }
        s.bulk_out_log.push(data.to_vec());
        Ok(())
    }

    fn interrupt(&mut self, _timeout_ms: u32) -> Result<Option<Vec<u8>>, MtpError> {
        Ok(None)
    }

    fn clear_halt(&mut self, endpoint: Endpoint) -> Result<(), MtpError> {
        let mut s = self.state().lock().unwrap();
        s.halts_cleared.push(endpoint);
        s.bytes_delivered_since_stall = 0;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), MtpError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn speed(&self) -> UsbSpeed {
        self.speed
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> DeviceSummary {
        DeviceSummary { device_id: "dev-1".to_string(), vid: 1, pid: 1, bus: 1, address: 1, speed: UsbSpeed::High }
    }

    #[test]
    fn enumerate_returns_the_virtual_device() {
        let t = VirtualTransport::new(summary());
        let devices = t.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "dev-1");
    }

    #[test]
    fn open_unknown_device_id_is_no_device() {
        let t = VirtualTransport::new(summary());
        assert!(matches!(t.open("nope", false), Err(MtpError::NoDevice)));
    }

    #[test]
    fn bulk_out_is_logged_in_order() {
        let t = VirtualTransport::new(summary());
        let mut h = t.open("dev-1", false).unwrap();
        h.bulk_out(&[1, 2, 3], 1000).unwrap();
        h.bulk_out(&[4, 5], 1000).unwrap();
        assert_eq!(t.bulk_out_log(), vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn injected_stall_then_clear_halt_recovers() {
        let t = VirtualTransport::new(summary());
        t.push_reply(vec![0xAA; 10]);
        t.inject_fault(InjectedFault::StallBulkIn { after_bytes: 0 });
        let mut h = t.open("dev-1", false).unwrap();
        assert!(matches!(h.bulk_in(1000), Err(MtpError::TransportStall { .. })));
        h.clear_halt(Endpoint::BulkIn).unwrap();
        assert_eq!(h.bulk_in(1000).unwrap(), vec![0xAA; 10]);
        assert_eq!(t.halts_cleared(), vec![Endpoint::BulkIn]);
    }
}
