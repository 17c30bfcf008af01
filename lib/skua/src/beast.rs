use crate::types::SYNC;

/// Appends `input` to `out`, doubling every sync byte.
///
/// Scans for the next sync, copies the run up to and including it, emits
/// the duplicate and continues. The unescaped decode path lives in the
/// input parser, which works against a refilling read buffer.
pub fn encode_into(out: &mut Vec<u8>, input: &[u8]) {
    let mut rest = input;

    while let Some(at) = rest.iter().position(|&ch| ch == SYNC) {
        out.extend_from_slice(&rest[..=at]);
        out.push(SYNC);
        rest = &rest[at + 1..];
    }

    out.extend_from_slice(rest);
}

/// Builds a complete uplink message: sync, type byte, escaped body.
#[inline]
pub fn message(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 2 * body.len());
    out.push(SYNC);
    out.push(msg_type);
    encode_into(&mut out, body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(&mut out, input);
        out
    }

    #[test]
    fn test_encode_passthrough() {
        assert_eq!(encode(b"abcdef"), b"abcdef");
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(b""), b"");
    }

    #[test]
    fn test_encode_doubles_sync() {
        assert_eq!(encode(&[0x61, 0x1a, 0x62]), &[0x61, 0x1a, 0x1a, 0x62]);
    }

    #[test]
    fn test_encode_sync_at_edges() {
        assert_eq!(
            encode(&[0x1a, 0x61, 0x1a]),
            &[0x1a, 0x1a, 0x61, 0x1a, 0x1a]
        );
    }

    #[test]
    fn test_encode_all_sync() {
        assert_eq!(encode(&[0x1a; 3]), &[0x1a; 6]);
    }

    #[test]
    fn test_message_empty_body() {
        assert_eq!(message(b'6', &[]), &[0x1a, b'6']);
    }

    #[test]
    fn test_message_escapes_body() {
        assert_eq!(
            message(b'5', &[0x00, 0x1a, 0xff]),
            &[0x1a, b'5', 0x00, 0x1a, 0x1a, 0xff]
        );
    }
}
