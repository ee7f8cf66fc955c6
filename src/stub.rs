use std::io::{self, Read, Seek, SeekFrom};

/// Literal that ends the executable stub; binary data follows it.
pub const HALT_MARKER: &[u8] = b"__HALT_COMPILER();";

/// Closing tags accepted right after the marker, longest first so a longer
/// suffix is never shadowed by one of its own prefixes.
pub const STUB_SUFFIXES: [&[u8]; 6] = [
    b" ?>\r\n",
    b"\n?>\r\n",
    b" ?>\n",
    b"\n?>\n",
    b" ?>",
    b"\n?>",
];

/// Longest entry in [`STUB_SUFFIXES`]; the scan never looks further ahead.
pub const MAX_SUFFIX_LEN: usize = 5;

pub const DEFAULT_STUB: &[u8] = b"<?php __HALT_COMPILER(); ?>\r\n";

/// Read the stub from `reader`, which must be positioned at the start of the
/// archive.  On return the reader sits on the first manifest byte.
///
/// If the marker never appears the whole stream is returned; check the
/// result with [`contains_marker`].
pub fn scan<R: Read + Seek>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut stub = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return Ok(stub);
        }
        stub.push(byte[0]);
        if stub.ends_with(HALT_MARKER) {
            break;
        }
    }

    let after_marker = reader.stream_position()?;
    let mut lookahead = Vec::with_capacity(MAX_SUFFIX_LEN);
    reader.by_ref().take(MAX_SUFFIX_LEN as u64).read_to_end(&mut lookahead)?;

    let suffix = STUB_SUFFIXES.iter().copied().find(|s| lookahead.starts_with(s));
    let consumed = suffix.map_or(0, |s| s.len());
    if let Some(s) = suffix {
        stub.extend_from_slice(s);
    }
    reader.seek(SeekFrom::Start(after_marker + consumed as u64))?;
    Ok(stub)
}

pub fn contains_marker(stub: &[u8]) -> bool {
    stub.windows(HALT_MARKER.len()).any(|w| w == HALT_MARKER)
}

/// True when `stub` ends with the marker, optionally followed by one of the
/// accepted closing tags.
pub fn validate(stub: &[u8]) -> bool {
    stub.ends_with(HALT_MARKER)
        || STUB_SUFFIXES.iter().any(|sfx| {
            stub.strip_suffix(*sfx)
                .is_some_and(|head| head.ends_with(HALT_MARKER))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn greedy_suffix_match() {
        let mut data = b"<?php __HALT_COMPILER(); ?>\r\n".to_vec();
        data.extend_from_slice(&[0xAA, 0xBB]);
        let mut cur = Cursor::new(&data);
        let stub = scan(&mut cur).unwrap();
        assert_eq!(stub, b"<?php __HALT_COMPILER(); ?>\r\n");
        assert_eq!(cur.position(), stub.len() as u64);
    }

    #[test]
    fn marker_without_suffix_stops_after_marker() {
        let data = b"#!/usr/bin/env php\n__HALT_COMPILER();\x07\x00\x00\x00";
        let mut cur = Cursor::new(&data[..]);
        let stub = scan(&mut cur).unwrap();
        assert!(stub.ends_with(HALT_MARKER));
        assert_eq!(cur.position(), stub.len() as u64);
    }

    #[test]
    fn short_tail_after_marker() {
        let data = b"<?php __HALT_COMPILER(); ?";
        let mut cur = Cursor::new(&data[..]);
        let stub = scan(&mut cur).unwrap();
        assert_eq!(stub, b"<?php __HALT_COMPILER();");
        assert_eq!(cur.position(), 24);
    }

    #[test]
    fn overlapping_prefix_is_found() {
        let data = b"___HALT_COMPILER(); ?>";
        let stub = scan(Cursor::new(&data[..])).unwrap();
        assert_eq!(stub, &data[..]);
    }

    #[test]
    fn missing_marker_consumes_everything() {
        let data = b"<?php echo 'no halt here';";
        let stub = scan(Cursor::new(&data[..])).unwrap();
        assert_eq!(stub, &data[..]);
        assert!(!contains_marker(&stub));
    }

    #[test]
    fn validate_accepts_all_suffixes() {
        for sfx in STUB_SUFFIXES {
            let mut stub = b"<?php ".to_vec();
            stub.extend_from_slice(HALT_MARKER);
            stub.extend_from_slice(sfx);
            assert!(validate(&stub), "{:?}", String::from_utf8_lossy(&stub));
        }
        assert!(validate(b"__HALT_COMPILER();"));
        assert!(validate(DEFAULT_STUB));
        assert!(!validate(b"<?php __HALT_COMPILER(); ?> trailing"));
        assert!(!validate(b"<?php echo 1;"));
    }
}
