//! Error taxonomy and retry/stall classifier.
//!
//! Mirrors the style of `MtpConnectionError` in the teacher crate: a
//! hand-written enum with `Display`, `std::error::Error`, and small
//! classification helpers, rather than a `thiserror` derive.

use std::fmt;

/// The phase of a PTP transaction a timeout was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    BulkOut,
    BulkIn,
    ResponseWait,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BulkOut => "bulkOut",
            Self::BulkIn => "bulkIn",
            Self::ResponseWait => "responseWait",
        };
        write!(f, "{s}")
    }
}

/// The USB endpoint direction a stall was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    BulkIn,
    BulkOut,
    Interrupt,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BulkIn => "bulkIn",
            Self::BulkOut => "bulkOut",
            Self::Interrupt => "interrupt",
        };
        write!(f, "{s}")
    }
}

/// Error taxonomy from spec §4.10 / §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtpError {
    /// Bulk endpoint halted; caller should clear-halt and retry once.
    TransportStall { endpoint: Endpoint },
    /// Deadline exceeded in a given transaction phase.
    TimeoutInPhase { phase: TransactionPhase },
    /// The device has disappeared from the bus.
    NoDevice,
    /// Non-OK PTP response code for a given transaction id.
    ProtocolError { code: u16, transaction_id: u32 },
    /// Policy or device declined the operation; no retry makes sense.
    Unsupported { reason: String },
    /// The codec could not decode a payload (short read).
    Truncated { offset: usize },
    /// The codec rejected a malformed payload.
    Malformed { offset: usize, reason: String },
    /// An internal invariant was violated; fatal to the session.
    Internal { reason: String },
    /// The caller's operation was cancelled before completion.
    Cancelled,
}

impl fmt::Display for MtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportStall { endpoint } => write!(f, "endpoint stalled: {endpoint}"),
            Self::TimeoutInPhase { phase } => write!(f, "timed out during {phase}"),
            Self::NoDevice => write!(f, "device is no longer present"),
            Self::ProtocolError { code, transaction_id } => {
                write!(f, "protocol error 0x{code:04x} (transaction {transaction_id})")
            }
            Self::Unsupported { reason } => write!(f, "unsupported: {reason}"),
            Self::Truncated { offset } => write!(f, "truncated buffer at offset {offset}"),
            Self::Malformed { offset, reason } => {
                write!(f, "malformed data at offset {offset}: {reason}")
            }
            Self::Internal { reason } => write!(f, "internal error: {reason}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for MtpError {}

/// Well-known PTP/MTP response codes referenced by the retry classifier.
pub mod response_code {
    pub const OK: u16 = 0x2001;
    pub const DEVICE_BUSY: u16 = 0x2019;
    pub const STORE_FULL: u16 = 0x200C;
    pub const INVALID_PARAMETER: u16 = 0x201D;
    pub const INVALID_STORAGE_ID: u16 = 0x2008;
    pub const OPERATION_NOT_SUPPORTED: u16 = 0x2005;
    pub const PARAMETER_NOT_SUPPORTED: u16 = 0x2006;
}

/// What the caller of the classifier should do about a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Recovered locally: clear the halt and retry the current transaction once.
    ClearHaltAndRetryOnce,
    /// Recovered locally: advance to the next rung of a fallback ladder (e.g. write targets).
    AdvanceLadder,
    /// Surface to the caller; the session stays `Ready`.
    SurfaceKeepSession,
    /// Surface to the caller; the session transitions to `Failed`.
    SurfaceFailSession,
}

impl MtpError {
    /// True if this error may succeed if the same operation is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportStall { .. } | Self::TimeoutInPhase { .. } | Self::ProtocolError { code: response_code::DEVICE_BUSY, .. }
        )
    }

    /// True if this error should advance a write-target ladder rung (spec §4.10).
    pub fn is_retryable_write_rejection(&self) -> bool {
        match self {
            Self::TimeoutInPhase { .. } => true,
            Self::ProtocolError { code, .. } => matches!(
                *code,
                response_code::INVALID_PARAMETER | response_code::INVALID_STORAGE_ID | response_code::PARAMETER_NOT_SUPPORTED | response_code::DEVICE_BUSY
            ),
            _ => false,
        }
    }

    /// A short, human-readable hint tied to the triggering condition (spec §7).
    pub fn hint(&self) -> String {
        match self {
            Self::TransportStall { endpoint } => format!("endpoint {endpoint} halted; cleared and retried"),
            Self::TimeoutInPhase { phase } => format!("no response during {phase}; device may be slow"),
            Self::NoDevice => "device disappeared from the bus".to_string(),
            Self::ProtocolError { code, .. } => format!("device returned response code 0x{code:04x}"),
            Self::Unsupported { reason } => reason.clone(),
            Self::Truncated { .. } => "device sent a short or partial dataset".to_string(),
            Self::Malformed { reason, .. } => reason.clone(),
            Self::Internal { reason } => reason.clone(),
            Self::Cancelled => "cancelled by caller".to_string(),
        }
    }
}

/// Classifies an error into the action the device actor / transfer engine
/// should take, per spec §4.10 and §7.
///
/// `consecutive_timeouts` is the number of *prior* consecutive timeouts on
/// this session (not counting the current error); three in a row is fatal.
pub fn classify(err: &MtpError, consecutive_timeouts: u32) -> RetryDecision {
    match err {
        MtpError::TransportStall { .. } => RetryDecision::ClearHaltAndRetryOnce,
        MtpError::TimeoutInPhase { .. } => {
            if consecutive_timeouts + 1 >= 3 {
                RetryDecision::SurfaceFailSession
            } else {
                RetryDecision::SurfaceKeepSession
            }
        }
        MtpError::NoDevice => RetryDecision::SurfaceFailSession,
        MtpError::Internal { .. } => RetryDecision::SurfaceFailSession,
        MtpError::ProtocolError { .. } | MtpError::Unsupported { .. } | MtpError::Truncated { .. } | MtpError::Malformed { .. } | MtpError::Cancelled => {
            RetryDecision::SurfaceKeepSession
        }
    }
}

/// CLI-visible exit code mapping (spec §7), for front-ends that want it.
pub fn exit_code(err: &MtpError) -> i32 {
    match err {
        MtpError::Unsupported { .. } => 69,
        MtpError::Internal { .. } => 70,
        MtpError::TimeoutInPhase { .. } | MtpError::ProtocolError { code: response_code::DEVICE_BUSY, .. } => 75,
        MtpError::NoDevice => 69,
        _ => 70,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_is_retryable_and_clears_halt() {
        let e = MtpError::TransportStall { endpoint: Endpoint::BulkIn };
        assert!(e.is_retryable());
        assert_eq!(classify(&e, 0), RetryDecision::ClearHaltAndRetryOnce);
    }

    #[test]
    fn third_consecutive_timeout_is_fatal() {
        let e = MtpError::TimeoutInPhase { phase: TransactionPhase::ResponseWait };
        assert_eq!(classify(&e, 0), RetryDecision::SurfaceKeepSession);
        assert_eq!(classify(&e, 1), RetryDecision::SurfaceKeepSession);
        assert_eq!(classify(&e, 2), RetryDecision::SurfaceFailSession);
    }

    #[test]
    fn no_device_is_always_fatal() {
        assert_eq!(classify(&MtpError::NoDevice, 0), RetryDecision::SurfaceFailSession);
    }

    #[test]
    fn retryable_write_rejections_match_spec_codes() {
        let busy = MtpError::ProtocolError { code: response_code::DEVICE_BUSY, transaction_id: 1 };
        let invalid_param = MtpError::ProtocolError { code: response_code::INVALID_PARAMETER, transaction_id: 1 };
        let invalid_storage = MtpError::ProtocolError { code: response_code::INVALID_STORAGE_ID, transaction_id: 1 };
        let other = MtpError::ProtocolError { code: 0x2002, transaction_id: 1 };
        assert!(busy.is_retryable_write_rejection());
        assert!(invalid_param.is_retryable_write_rejection());
        assert!(invalid_storage.is_retryable_write_rejection());
        assert!(!other.is_retryable_write_rejection());
    }

    #[test]
    fn display_is_non_empty_for_all_variants() {
        let errs = vec![
            MtpError::TransportStall { endpoint: Endpoint::BulkOut },
            MtpError::TimeoutInPhase { phase: TransactionPhase::BulkOut },
            MtpError::NoDevice,
            MtpError::ProtocolError { code: 0x2002, transaction_id: 5 },
            MtpError::Unsupported { reason: "partial read".to_string() },
            MtpError::Truncated { offset: 10 },
            MtpError::Malformed { offset: 3, reason: "bad length".to_string() },
            MtpError::Internal { reason: "invariant violated".to_string() },
            MtpError::Cancelled,
        ];
        for e in errs {
            assert!(!e.to_string().is_empty());
            assert!(!e.hint().is_empty());
        }
    }

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(exit_code(&MtpError::NoDevice), 69);
        assert_eq!(exit_code(&MtpError::Internal { reason: "x".into() }), 70);
        assert_eq!(
            exit_code(&MtpError::TimeoutInPhase { phase: TransactionPhase::BulkIn }),
            75
        );
    }
}
