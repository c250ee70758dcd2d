//! Property-based tests for the codec laws.

use doorkeep_core::{AccessLevel, KeyRecord, Tag};
use doorkeep_protocol::{KeyHash, ProtocolError, TimeCode, decode_line, encode_frame};
use proptest::prelude::*;

/// Command text as the host or firmware would emit it.
fn command_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9 ]{0,40}")
        .expect("Failed to create command text regex strategy")
}

/// Printable ASCII that keeps the line a candidate frame. `#` in first
/// position turns it into noise and a newline splits it, so both are left
/// out; non-ASCII bytes have their own error.
fn replacement_char() -> impl Strategy<Value = char> {
    prop::sample::select(
        ('0'..='9')
            .chain('A'..='Z')
            .chain('a'..='z')
            .collect::<Vec<_>>(),
    )
}

fn key_record() -> impl Strategy<Value = KeyRecord> {
    ("[A-F0-9]{4,10}", "[0-9]{4,6}").prop_map(|(id, pin)| {
        KeyRecord::for_tag(&Tag::new(&id, &pin, AccessLevel::Both).unwrap())
    })
}

proptest! {
    #[test]
    fn prop_time_code_roundtrip(secs in 0u64..(1u64 << 36)) {
        let code = TimeCode::from_secs(secs);
        prop_assert_eq!(code.secs(), secs);
        let parsed: TimeCode = code.as_str().parse().unwrap();
        prop_assert_eq!(parsed.secs(), secs);
    }

    #[test]
    fn prop_frame_always_validates(text in command_text()) {
        let frame = encode_frame(&text);
        let line = frame.strip_suffix('\n').unwrap();
        prop_assert_eq!(decode_line(line.as_bytes()).unwrap(), Some(text));
    }

    #[test]
    fn prop_single_flip_detected(
        text in command_text(),
        index in any::<prop::sample::Index>(),
        replacement in replacement_char(),
    ) {
        let frame = encode_frame(&text);
        let mut line: Vec<char> = frame.strip_suffix('\n').unwrap().chars().collect();
        let i = index.index(line.len());
        prop_assume!(line[i] != replacement);
        line[i] = replacement;
        let corrupted: String = line.into_iter().collect();

        let result = decode_line(corrupted.as_bytes());
        prop_assert!(
            matches!(result, Err(ProtocolError::ChecksumMismatch { .. })),
            "corruption of {:?} not detected: {:?}", corrupted, result
        );
    }

    #[test]
    fn prop_non_ascii_flip_rejected(
        text in command_text(),
        index in any::<prop::sample::Index>(),
        replacement in prop::sample::select(vec!['é', 'ß', '\u{80}', '€']),
    ) {
        let frame = encode_frame(&text);
        let mut line: Vec<char> = frame.strip_suffix('\n').unwrap().chars().collect();
        let i = index.index(line.len());
        line[i] = replacement;
        let corrupted: String = line.into_iter().collect();

        let result = decode_line(corrupted.as_bytes());
        prop_assert!(matches!(result, Err(ProtocolError::NotAscii(_))), "{:?}", result);
    }

    #[test]
    fn prop_comment_marker_first_is_noise(text in command_text()) {
        let frame = encode_frame(&text);
        let line = format!("#{}", &frame.strip_suffix('\n').unwrap()[1..]);
        prop_assert_eq!(decode_line(line.as_bytes()).unwrap(), None);
    }

    #[test]
    fn prop_key_hash_deterministic(keys in prop::collection::vec(key_record(), 0..8)) {
        prop_assert_eq!(KeyHash::of(&keys), KeyHash::of(&keys.clone()));
    }

    /// Two keys differing only in the last PIN digit: the swapped lists
    /// differ by a single-byte error pattern the CRC always catches.
    #[test]
    fn prop_key_hash_detects_swap(
        id in "[A-F0-9]{4,10}",
        pin in "[0-9]{3,5}",
        x in 0u8..10,
        y in 0u8..10,
    ) {
        prop_assume!(x != y);
        let make = |d: u8| {
            let pin = format!("{pin}{d}");
            KeyRecord::for_tag(&Tag::new(&id, &pin, AccessLevel::Both).unwrap())
        };
        let (a, b) = (make(x), make(y));
        let forward = KeyHash::of(&[a.clone(), b.clone()]);
        let reverse = KeyHash::of(&[b, a]);
        prop_assert_ne!(forward, reverse);
    }
}
