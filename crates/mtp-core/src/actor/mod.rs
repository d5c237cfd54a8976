//! Device actor: the exclusive owner of a single session on a single
//! transport (spec §4.4). Reachable concurrently from many callers;
//! internally single-threaded cooperative — at most one PTP transaction is
//! in flight at any instant, enforced by serializing on an async mutex
//! (whose FIFO wake order gives the submission-ordering guarantee of §5).

mod state;
pub mod registry;

pub use registry::Registry;
pub use state::ActorState;

use crate::codec::{Decode, Reader};
use crate::error::{response_code, Endpoint, MtpError, TransactionPhase};
use crate::ptp::{Container, ContainerAssembler, ContainerType, DeviceEvent, DeviceInfo, OperationCode};
use crate::quirks::{DevicePolicy, OpenSessionRetryStep};
use crate::transport::{Transport, TransportHandle, UsbSpeed};
use tokio::sync::{broadcast, Mutex};

/// How many interrupt/bulk-IN polls an in-flight data/response read is
/// allowed before it is treated as a timeout. A real transport would error
/// out on its own deadline; this bounds the virtual transport's zero-byte
/// reads from spinning forever.
const MAX_EMPTY_READ_ATTEMPTS: usize = 64;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The decoded outcome of a successful transaction: response parameters
/// plus an optional data-phase payload (when the operation has an in-data
/// phase, spec §4.4 step 4).
#[derive(Debug, Clone, Default)]
pub struct TransactionOutcome {
    pub response_params: Vec<u32>,
    pub payload: Option<Vec<u8>>,
}

struct ActorInner {
    handle: Option<Box<dyn TransportHandle>>,
    state: ActorState,
    next_transaction_id: u32,
    consecutive_timeouts: u32,
    device_info: Option<DeviceInfo>,
    policy: DevicePolicy,
    speed: Option<UsbSpeed>,
}

/// A single device's session state machine, transaction serializer, and
/// event source.
pub struct DeviceActor {
    device_id: String,
    inner: Mutex<ActorInner>,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceActor {
    pub fn new(device_id: impl Into<String>, policy: DevicePolicy) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            device_id: device_id.into(),
            inner: Mutex::new(ActorInner {
                handle: None,
                state: ActorState::Closed,
                next_transaction_id: 1,
                consecutive_timeouts: 0,
                device_info: None,
                policy,
                speed: None,
            }),
            events,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Subscribers may lag; they never block the actor (spec §4.4 Events).
    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ActorState {
        self.inner.lock().await.state.clone()
    }

    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.lock().await.device_info.clone()
    }

    /// The USB speed negotiated at open, read from the transport handle
    /// (spec §4.5 step 3, §3 `ProbeReceipt` "USB speed class"). `None`
    /// before the first successful `open()`.
    pub async fn speed(&self) -> Option<UsbSpeed> {
        self.inner.lock().await.speed
    }

    pub async fn policy(&self) -> DevicePolicy {
        self.inner.lock().await.policy.clone()
    }

    /// Drives `Closed -> Opening -> Ready` (or `Failed`): claims the
    /// transport, reads `GetDeviceInfo` without a session, then issues
    /// `OpenSession(1)`, walking the reset ladder once on `Busy` per the
    /// spec's pinned Open Question #2 behavior.
    pub async fn open(&self, transport: &dyn Transport) -> Result<(), MtpError> {
        let mut guard = self.inner.lock().await;
        if !matches!(guard.state, ActorState::Closed) {
            return Err(MtpError::Internal { reason: "open() called while the actor was not Closed".to_string() });
        }
        guard.state = ActorState::Opening;

        let require_detach = guard.policy.require_kernel_detach;
        let mut handle = match transport.open(&self.device_id, require_detach) {
            Ok(h) => h,
            Err(e) => {
                guard.state = ActorState::Failed(e.clone());
                return Err(e);
            }
        };
        guard.speed = Some(handle.speed());
        guard.policy.raise_chunk_floor(handle.speed().chunk_floor());
        let handshake_timeout = guard.policy.handshake_timeout_ms;

        let device_info = match Self::execute(
            handle.as_mut(),
            &mut guard.next_transaction_id,
            OperationCode::GetDeviceInfo as u16,
            vec![],
            None,
            true,
            handshake_timeout,
        ) {
            Ok(outcome) => {
                let payload = outcome.payload.ok_or_else(|| MtpError::Internal {
                    reason: "GetDeviceInfo returned no data phase".to_string(),
                });
                let payload = match payload {
                    Ok(p) => p,
                    Err(e) => {
                        guard.state = ActorState::Failed(e.clone());
                        return Err(e);
                    }
                };
                match DeviceInfo::decode(&mut Reader::new(&payload)) {
                    Ok(info) => info,
                    Err(e) => {
                        guard.state = ActorState::Failed(e.clone());
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                guard.state = ActorState::Failed(e.clone());
                return Err(e);
            }
        };

        let ladder = guard.policy.open_session_reset_ladder.clone();
        let mut used_ladder_step = false;
        loop {
            let result = Self::execute(
                handle.as_mut(),
                &mut guard.next_transaction_id,
                OperationCode::OpenSession as u16,
                vec![1],
                None,
                false,
                handshake_timeout,
            );
            match result {
                Ok(_) => break,
                Err(MtpError::ProtocolError { code, .. }) if code == response_code::DEVICE_BUSY && !used_ladder_step => {
                    used_ladder_step = true;
                    if let Some(step) = ladder.first() {
                        Self::apply_reset_step(handle.as_mut(), *step);
                    }
                    continue;
                }
                Err(e) => {
                    guard.state = ActorState::Failed(e.clone());
                    return Err(e);
                }
            }
        }

        if guard.policy.stabilize_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(guard.policy.stabilize_ms as u64)).await;
        }

        guard.device_info = Some(device_info);
        guard.handle = Some(handle);
        guard.state = ActorState::Ready;
        Ok(())
    }

    /// Cancels any in-flight transfer intent (callers are expected to have
    /// already stopped submitting), issues `CloseSession` best-effort, and
    /// releases the transport (spec §4.4 `Closing`).
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if matches!(guard.state, ActorState::Closed) {
            return;
        }
        guard.state = ActorState::Closing;
        {
            let timeout = guard.policy.io_timeout_ms;
            let inner = &mut *guard;
            if let Some(handle) = inner.handle.as_mut() {
                let _ = Self::execute(handle.as_mut(), &mut inner.next_transaction_id, OperationCode::CloseSession as u16, vec![], None, false, timeout);
                handle.close();
            }
        }
        guard.handle = None;
        guard.device_info = None;
        guard.speed = None;
        guard.state = ActorState::Closed;
    }

    /// Runs one PTP transaction to completion, serialized against every
    /// other caller of this method on the same actor (spec §4.4/§5 ordering
    /// guarantees). Applies the stall/timeout/no-device failure semantics
    /// of spec §4.4 and transitions session state accordingly.
    pub async fn transact(
        &self,
        opcode: u16,
        params: Vec<u32>,
        out_data: Option<Vec<u8>>,
        expects_in_data: bool,
    ) -> Result<TransactionOutcome, MtpError> {
        let mut guard = self.inner.lock().await;
        if !guard.state.is_ready() {
            return match &guard.state {
                ActorState::Failed(e) => Err(e.clone()),
                other => Err(MtpError::Internal { reason: format!("transact() called while actor state was {other:?}") }),
            };
        }
        let timeout = guard.policy.io_timeout_ms;
        let inner = &mut *guard;
        let Some(handle) = inner.handle.as_mut() else {
            inner.state = ActorState::Failed(MtpError::NoDevice);
            return Err(MtpError::NoDevice);
        };

        let result = Self::execute(handle.as_mut(), &mut inner.next_transaction_id, opcode, params, out_data, expects_in_data, timeout);

        match &result {
            Ok(_) => {
                guard.consecutive_timeouts = 0;
            }
            Err(MtpError::TimeoutInPhase { .. }) => {
                let decision = crate::error::classify(result.as_ref().unwrap_err(), guard.consecutive_timeouts);
                guard.consecutive_timeouts += 1;
                if decision == crate::error::RetryDecision::SurfaceFailSession {
                    guard.state = ActorState::Failed(result.as_ref().unwrap_err().clone());
                }
            }
            Err(MtpError::NoDevice) | Err(MtpError::Internal { .. }) => {
                guard.state = ActorState::Failed(result.as_ref().unwrap_err().clone());
            }
            Err(_) => {
                guard.consecutive_timeouts = 0;
            }
        }
        result
    }

    /// Polls the interrupt endpoint once, decodes any event, and broadcasts
    /// it. Used by the event bridge (spec §4.9); never blocks the
    /// transaction serializer for longer than one interrupt read.
    pub async fn poll_event(&self) -> Result<Option<DeviceEvent>, MtpError> {
        let mut guard = self.inner.lock().await;
        if !guard.state.is_ready() {
            return Ok(None);
        }
        let Some(handle) = guard.handle.as_mut() else { return Ok(None) };
        let Some(bytes) = handle.interrupt(100)? else { return Ok(None) };
        let container = Container::decode(&bytes)?;
        if container.kind != ContainerType::Event {
            return Ok(None);
        }
        let event = DeviceEvent::decode(container.code, &container.params);
        let _ = self.events.send(event.clone());
        Ok(Some(event))
    }

    fn apply_reset_step(handle: &mut dyn TransportHandle, step: OpenSessionRetryStep) {
        match step {
            OpenSessionRetryStep::Reopen => {}
            OpenSessionRetryStep::ClearHalts => {
                let _ = handle.clear_halt(Endpoint::BulkIn);
                let _ = handle.clear_halt(Endpoint::BulkOut);
            }
            OpenSessionRetryStep::Reset => {
                let _ = handle.reset();
            }
            OpenSessionRetryStep::ReEnumerate => {}
        }
    }

    /// Runs the PTP transaction protocol of spec §4.4 steps 1-6 against an
    /// already-claimed handle. A `TransportStall` during any bulk step
    /// clears the affected halt and retries the whole transaction exactly
    /// once; a repeat stall (or any other error) is returned as-is.
    fn execute(
        handle: &mut dyn TransportHandle,
        next_transaction_id: &mut u32,
        opcode: u16,
        params: Vec<u32>,
        out_data: Option<Vec<u8>>,
        expects_in_data: bool,
        timeout_ms: u32,
    ) -> Result<TransactionOutcome, MtpError> {
        let transaction_id = *next_transaction_id;
        *next_transaction_id = next_transaction_id.wrapping_add(1).max(1);

        match Self::run_once(handle, transaction_id, opcode, &params, out_data.as_deref(), expects_in_data, timeout_ms) {
            Err(MtpError::TransportStall { endpoint }) => {
                let _ = handle.clear_halt(endpoint);
                Self::run_once(handle, transaction_id, opcode, &params, out_data.as_deref(), expects_in_data, timeout_ms)
            }
            other => other,
        }
    }

    fn run_once(
        handle: &mut dyn TransportHandle,
        transaction_id: u32,
        opcode: u16,
        params: &[u32],
        out_data: Option<&[u8]>,
        expects_in_data: bool,
        timeout_ms: u32,
    ) -> Result<TransactionOutcome, MtpError> {
        let command = Container::command(opcode, transaction_id, params.to_vec());
        handle.bulk_out(&command.encode(), timeout_ms)?;

        if let Some(data) = out_data {
            let data_container = Container::data(opcode, transaction_id, data.to_vec());
            handle.bulk_out(&data_container.encode(), timeout_ms)?;
        }

        let payload = if expects_in_data {
            let container = Self::read_container(handle, timeout_ms, TransactionPhase::BulkIn)?;
            Some(container.payload)
        } else {
            None
        };

        let response = Self::read_container(handle, timeout_ms, TransactionPhase::ResponseWait)?;
        if response.kind != ContainerType::Response {
            return Err(MtpError::Internal { reason: format!("expected Response container, got {:?}", response.kind) });
        }
        if response.code != response_code::OK {
            return Err(MtpError::ProtocolError { code: response.code, transaction_id });
        }
        Ok(TransactionOutcome { response_params: response.params, payload })
    }

    fn read_container(handle: &mut dyn TransportHandle, timeout_ms: u32, phase: TransactionPhase) -> Result<Container, MtpError> {
        let mut assembler = ContainerAssembler::new(handle.max_packet_size());
        for _ in 0..MAX_EMPTY_READ_ATTEMPTS {
            let chunk = handle.bulk_in(timeout_ms)?;
            assembler.feed(&chunk);
            if let Some(container) = assembler.take_container()? {
                return Ok(container);
            }
        }
        Err(MtpError::TimeoutInPhase { phase })
    }
}
