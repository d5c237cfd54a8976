//! PTP container framing: Command / Data / Response / Event.

use crate::codec::{Reader, Writer};
use crate::error::MtpError;

pub const HEADER_LEN: usize = 12;
pub const MAX_PARAMS: usize = 5;

/// The four container types carried on the bulk/interrupt endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Command,
    Data,
    Response,
    Event,
}

impl ContainerType {
    fn wire_value(self) -> u16 {
        match self {
            Self::Command => 1,
            Self::Data => 2,
            Self::Response => 3,
            Self::Event => 4,
        }
    }

    fn from_wire(v: u16) -> Result<Self, MtpError> {
        Ok(match v {
            1 => Self::Command,
            2 => Self::Data,
            3 => Self::Response,
            4 => Self::Event,
            other => {
                return Err(MtpError::Malformed {
                    offset: 2,
                    reason: format!("unknown container type {other}"),
                });
            }
        })
    }
}

/// A fully-assembled PTP container. `params` holds up to 5 parameters for
/// Command/Response containers; `payload` holds the data for Data/Event
/// containers carrying a payload longer than fits in `params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ContainerType,
    pub code: u16,
    pub transaction_id: u32,
    pub params: Vec<u32>,
    pub payload: Vec<u8>,
}

impl Container {
    pub fn command(code: u16, transaction_id: u32, params: Vec<u32>) -> Self {
        debug_assert!(params.len() <= MAX_PARAMS);
        Self { kind: ContainerType::Command, code, transaction_id, params, payload: Vec::new() }
    }

    pub fn data(code: u16, transaction_id: u32, payload: Vec<u8>) -> Self {
        Self { kind: ContainerType::Data, code, transaction_id, params: Vec::new(), payload }
    }

    pub fn response(code: u16, transaction_id: u32, params: Vec<u32>) -> Self {
        debug_assert!(params.len() <= MAX_PARAMS);
        Self { kind: ContainerType::Response, code, transaction_id, params, payload: Vec::new() }
    }

    pub fn event(code: u16, transaction_id: u32, params: Vec<u32>) -> Self {
        Self { kind: ContainerType::Event, code, transaction_id, params, payload: Vec::new() }
    }

    /// Encodes the container to its wire bytes, including the ZLP the peer
    /// would need to send/expect if the payload is an exact multiple of
    /// `max_packet_size` (0 disables the check).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(HEADER_LEN + self.payload.len() + self.params.len() * 4);
        let body_len = match self.kind {
            ContainerType::Command | ContainerType::Response | ContainerType::Event => self.params.len() * 4,
            ContainerType::Data => self.payload.len(),
        };
        let total_len = (HEADER_LEN + body_len) as u32;
        w.write_u32(total_len);
        w.write_u16(self.kind.wire_value());
        w.write_u16(self.code);
        w.write_u32(self.transaction_id);
        match self.kind {
            ContainerType::Command | ContainerType::Response | ContainerType::Event => {
                for p in &self.params {
                    w.write_u32(*p);
                }
            }
            ContainerType::Data => w.write_bytes(&self.payload),
        }
        w.into_bytes()
    }

    /// Decodes a single, already fully-accumulated container buffer.
    /// The length field is validated but not re-checked against `buf.len()`
    /// beyond what's needed to decode — callers using [`ContainerAssembler`]
    /// guarantee `buf.len() >= length`.
    pub fn decode(buf: &[u8]) -> Result<Self, MtpError> {
        let mut r = Reader::new(buf);
        let total_len = r.read_u32()? as usize;
        if total_len < HEADER_LEN {
            return Err(MtpError::Malformed { offset: 0, reason: "container length shorter than header".to_string() });
        }
        let kind = ContainerType::from_wire(r.read_u16()?)?;
        let code = r.read_u16()?;
        let transaction_id = r.read_u32()?;
        let body_len = total_len - HEADER_LEN;
        if r.remaining() < body_len {
            return Err(MtpError::Truncated { offset: r.position() });
        }
        match kind {
            ContainerType::Command | ContainerType::Response | ContainerType::Event => {
                if !body_len.is_multiple_of(4) || body_len / 4 > MAX_PARAMS {
                    return Err(MtpError::Malformed {
                        offset: r.position(),
                        reason: "parameter block has an invalid length".to_string(),
                    });
                }
                let mut params = Vec::with_capacity(body_len / 4);
                for _ in 0..(body_len / 4) {
                    params.push(r.read_u32()?);
                }
                Ok(Self { kind, code, transaction_id, params, payload: Vec::new() })
            }
            ContainerType::Data => {
                let payload = r.read_bytes(body_len)?.to_vec();
                Ok(Self { kind, code, transaction_id, params: Vec::new(), payload })
            }
        }
    }
}

/// Accumulates containers that may span multiple USB bulk transfers.
///
/// A Data container's declared length may exceed a single transfer; the
/// caller feeds each raw USB read via [`Self::feed`] until
/// [`Self::take_container`] returns `Some`. Zero-length packets at a
/// multiple-of-`max_packet_size` boundary are tolerated whether the peer
/// sends them or not (spec §4.2).
pub struct ContainerAssembler {
    buf: Vec<u8>,
    max_packet_size: usize,
}

impl ContainerAssembler {
    pub fn new(max_packet_size: usize) -> Self {
        Self { buf: Vec::new(), max_packet_size }
    }

    /// Feeds one raw USB read. A read of zero bytes (a ZLP) is accepted and
    /// ignored — it never contributes to the accumulated buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Returns the total length declared by the header, once at least the
    /// header has been accumulated.
    fn declared_len(&self) -> Option<usize> {
        if self.buf.len() < 4 {
            return None;
        }
        Some(u32::from_le_bytes(self.buf[0..4].try_into().unwrap()) as usize)
    }

    /// True if a ZLP would be expected to terminate a transfer of exactly
    /// `declared_len` bytes on an endpoint with this assembler's max packet size.
    pub fn expects_zlp(&self, declared_len: usize) -> bool {
        self.max_packet_size > 0 && declared_len.is_multiple_of(self.max_packet_size)
    }

    /// If a full container has been accumulated, decodes and removes it from
    /// the internal buffer (leaving any trailing bytes for the next container).
    pub fn take_container(&mut self) -> Result<Option<Container>, MtpError> {
        let Some(declared) = self.declared_len() else { return Ok(None) };
        if declared < HEADER_LEN {
            return Err(MtpError::Malformed { offset: 0, reason: "container length shorter than header".to_string() });
        }
        if self.buf.len() < declared {
            return Ok(None);
        }
        let container = Container::decode(&self.buf[..declared])?;
        self.buf.drain(..declared);
        Ok(Some(container))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips() {
        let c = Container::command(0x1001, 7, vec![1, 2, 3]);
        let bytes = c.encode();
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(c, decoded);
    }

    #[test]
    fn data_round_trips() {
        let c = Container::data(0x1009, 3, vec![1, 2, 3, 4, 5]);
        let bytes = c.encode();
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(c, decoded);
    }

    #[test]
    fn assembler_accumulates_across_multiple_feeds() {
        let full = Container::data(0x1009, 1, vec![0xAAu8; 100]).encode();
        let mut asm = ContainerAssembler::new(64);
        asm.feed(&full[0..20]);
        assert!(asm.take_container().unwrap().is_none());
        asm.feed(&full[20..]);
        let c = asm.take_container().unwrap().unwrap();
        assert_eq!(c.payload.len(), 100);
    }

    #[test]
    fn assembler_tolerates_trailing_zlp() {
        // max_packet_size=16, payload exactly fills packets -> ZLP expected but optional to feed.
        let full = Container::data(0x1009, 1, vec![0u8; 4]).encode();
        let mut asm = ContainerAssembler::new(16);
        asm.feed(&full);
        asm.feed(&[]); // tolerated ZLP
        let c = asm.take_container().unwrap().unwrap();
        assert_eq!(c.payload.len(), 4);
    }

    #[test]
    fn response_ok_vs_other_code() {
        let ok = Container::response(crate::error::response_code::OK, 1, vec![]);
        assert_eq!(ok.code, crate::error::response_code::OK);
    }

    #[test]
    fn truncated_container_is_reported_not_panicked() {
        let full = Container::data(0x1009, 1, vec![1, 2, 3, 4]).encode();
        // Drop the last byte: declared length says more than is actually present.
        let short = &full[..full.len() - 1];
        assert!(matches!(Container::decode(short), Err(MtpError::Truncated { .. })));
    }
}
