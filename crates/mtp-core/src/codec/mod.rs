//! Little-endian binary codec: the canonical encode/decode layer used by
//! every protocol layer in this crate (spec §4.1).
//!
//! No raw byte-copy helpers are permitted to exist outside this module —
//! containers and datasets always go through [`Reader`] and [`Writer`].

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use crate::error::MtpError;

/// A type that can be decoded from a little-endian [`Reader`].
pub trait Decode: Sized {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, MtpError>;
}

/// A type that can be encoded to a little-endian [`Writer`].
pub trait Encode {
    fn encode(&self, writer: &mut Writer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trips() {
        let mut w = Writer::new();
        w.write_u32(0xDEAD_BEEF);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
    }
}
