//! Short message classification.
//!
//! Drivers deliver short messages packed into a fixed-size word. The number of meaningful bytes
//! is derived from the leading status byte only. Data bytes are not validated and running status
//! is not reconstructed: whatever follows the status byte is passed through as is.

/// Returns the length of a short message which starts with `status`.
pub fn short_message_len(status: u8) -> usize {
    match status & 0xf0 {
        // note off, note on, polyphonic aftertouch, control change, pitch bend
        0x80 | 0x90 | 0xa0 | 0xb0 | 0xe0 => 3,
        // program change, channel aftertouch
        0xc0 | 0xd0 => 2,
        _ => match status {
            // song position pointer
            0xf2 => 3,
            // song select
            0xf3 => 2,
            _ => 1,
        },
    }
}

/// Returns meaningful bytes of a packed short message.
///
/// Bytes are packed little-endian, the status byte being the least significant one.
pub fn unpack_short_message(packed: u32) -> ([u8; 4], usize) {
    let bytes = packed.to_le_bytes();
    let len = short_message_len(bytes[0]);
    (bytes, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_messages() {
        assert_eq!(short_message_len(0x80), 3);
        assert_eq!(short_message_len(0x9f), 3);
        assert_eq!(short_message_len(0xa1), 3);
        assert_eq!(short_message_len(0xb0), 3);
        assert_eq!(short_message_len(0xc5), 2);
        assert_eq!(short_message_len(0xd0), 2);
        assert_eq!(short_message_len(0xe7), 3);
    }

    #[test]
    fn system_messages() {
        assert_eq!(short_message_len(0xf2), 3);
        assert_eq!(short_message_len(0xf3), 2);
        assert_eq!(short_message_len(0xf8), 1);
        assert_eq!(short_message_len(0xfe), 1);
    }

    #[test]
    fn data_bytes_pass_through() {
        // A data byte in status position (running status) is treated as a one-byte message.
        assert_eq!(short_message_len(0x40), 1);

        let (bytes, len) = unpack_short_message(0x007f_4090);
        assert_eq!(&bytes[..len], &[0x90, 0x40, 0x7f]);

        let (bytes, len) = unpack_short_message(0x0000_05c0);
        assert_eq!(&bytes[..len], &[0xc0, 0x05]);
    }
}
