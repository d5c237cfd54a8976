//! Property-based tests for the codec's universal and codec-specific
//! invariants (spec §8): encode/decode round-trips, the `0xFFFF` undefined
//! sentinel never aliasing a defined code, the empty wide-string edge case,
//! and truncation never panicking regardless of where a buffer is cut.

use mtp_core::codec::{Reader, Writer};
use mtp_core::ptp::DataTypeCode;
use proptest::prelude::*;

proptest! {
    #[test]
    fn u32_round_trips_through_encode_decode(v in any::<u32>()) {
        let mut w = Writer::new();
        w.write_u32(v);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        prop_assert_eq!(r.read_u32().unwrap(), v);
    }

    #[test]
    fn u64_round_trips_through_encode_decode(v in any::<u64>()) {
        let mut w = Writer::new();
        w.write_u64(v);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        prop_assert_eq!(r.read_u64().unwrap(), v);
    }

    #[test]
    fn wide_string_round_trips_for_any_printable_ascii(s in "[ -~]{0,64}") {
        let mut w = Writer::new();
        w.write_wide_string(&s);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        prop_assert_eq!(r.read_wide_string().unwrap(), s);
    }

    #[test]
    fn empty_wide_string_never_writes_a_terminator(unused in any::<u8>()) {
        let _ = unused;
        let mut w = Writer::new();
        w.write_wide_string("");
        prop_assert_eq!(w.into_bytes(), vec![0u8]);
    }

    /// Submission-order preservation: a u32 array encodes and decodes back
    /// in the exact order it was written, for any sequence.
    #[test]
    fn u32_array_preserves_submission_order(items in prop::collection::vec(any::<u32>(), 0..32)) {
        let mut w = Writer::new();
        w.write_array(&items, |w, v| w.write_u32(*v));
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        let decoded = r.read_array(|r| r.read_u32()).unwrap();
        prop_assert_eq!(decoded, items);
    }

    /// `0xFFFF` always decodes as the undefined sentinel and no other u16
    /// ever aliases it.
    #[test]
    fn data_type_code_0xffff_is_the_only_undefined_value(code in any::<u16>()) {
        let dt = DataTypeCode(code);
        prop_assert_eq!(dt.is_undefined(), code == 0xFFFF);
    }

    /// Truncating any encoded buffer at any offset must never panic: either
    /// it fails with a typed `Truncated`/`Malformed` error or (for types that
    /// support streaming) decodes a valid prefix.
    #[test]
    fn truncated_u64_buffer_never_panics(v in any::<u64>(), cut in 0usize..8) {
        let mut w = Writer::new();
        w.write_u64(v);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf[..cut]);
        let _ = r.read_u64(); // must not panic regardless of `cut`
    }

    #[test]
    fn truncated_wide_string_buffer_never_panics(s in "[ -~]{1,32}", cut in 0usize..8) {
        let mut w = Writer::new();
        w.write_wide_string(&s);
        let buf = w.into_bytes();
        let end = cut.min(buf.len());
        let mut r = Reader::new(&buf[..end]);
        let _ = r.read_wide_string(); // must not panic regardless of where it's cut
    }
}
