//! Stuffbit framing codec for ISO 14443 Type B.
//!
//! Octet payloads are flattened into a transmit symbol stream, one symbol
//! ("stuffbit") per elementary time unit, packed eight to a byte MSB-first.
//! Both directions share the same character framing (a start bit of 0,
//! eight data bits LSB-first, a stop bit of 1) and the same SOF/EOF
//! sentinels, but differ in their prelude and sample grid:
//!
//! - **Reader to tag** (ASK, NRZ-L): SOF of 10 zero ETUs and 2 one ETUs,
//!   EOF of 10 zero ETUs, one stuffbit per ETU.
//! - **Tag to reader** (BPSK): the same structure at 4× oversample to match
//!   the 848 kHz subcarrier grid of the simulator FPGA, prefixed by 10 ETUs
//!   of logic 1 (TR1) so the reader can train its phase reference.
//!
//! Both encoders finish with a run of logic 1 that pads the final byte, so
//! the transmitter consumes exactly [`ToSend::len`] bytes.

use crate::consts::TOSEND_BUFFER_LEN;
use heapless::Vec;

/// Transmit symbol buffer shared by the encoders and the transmit engine.
///
/// Stores one symbol per stuffbit, eight per byte MSB-first, with the
/// valid-length cursor tracking every byte the encoders have produced.
#[derive(Debug, Default)]
pub struct ToSend {
    buf: Vec<u8, TOSEND_BUFFER_LEN>,
    bit: u8,
}

impl ToSend {
    /// Creates an empty stuffbit buffer.
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            bit: 0,
        }
    }

    /// Clears the buffer. Every encoder calls this on entry.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.bit = 0;
    }

    /// Appends one transmit symbol.
    pub fn stuffbit(&mut self, symbol: bool) {
        if self.bit == 0 {
            let _ = self.buf.push(0);
        }
        if symbol {
            let last = self.buf.len() - 1;
            self.buf[last] |= 0x80 >> self.bit;
        }
        self.bit = (self.bit + 1) & 7;
    }

    /// Appends one symbol four times (the 848 kHz oversample grid).
    pub fn stuffbit4(&mut self, symbol: bool) {
        for _ in 0..4 {
            self.stuffbit(symbol);
        }
    }

    /// The encoded bytes, exactly as the transmitter must push them.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Number of valid bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no symbols have been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Iterates the buffered symbols in transmit order.
    pub fn symbols(&self) -> impl Iterator<Item = bool> + '_ {
        self.buf
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| byte & (0x80 >> bit) != 0))
    }
}

/// Encodes a reader-to-tag command as an ASK/NRZ-L stuffbit stream.
pub fn encode_reader(ts: &mut ToSend, msg: &[u8]) {
    ts.reset();

    // SOF: 10 ETUs unmodulated, 2-3 ETUs modulated
    for _ in 0..10 {
        ts.stuffbit(false);
    }
    for _ in 0..2 {
        ts.stuffbit(true);
    }

    for byte in msg {
        ts.stuffbit(false); // start bit
        let mut b = *byte;
        for _ in 0..8 {
            ts.stuffbit(b & 1 != 0);
            b >>= 1;
        }
        ts.stuffbit(true); // stop bit
    }

    // EOF: 10 ETUs unmodulated
    for _ in 0..10 {
        ts.stuffbit(false);
    }

    // pad with field-on symbols to reach the byte boundary
    for _ in 0..8 {
        ts.stuffbit(true);
    }
}

/// Encodes a tag-to-reader response as a BPSK stuffbit stream at 4× oversample.
pub fn encode_tag(ts: &mut ToSend, msg: &[u8]) {
    ts.reset();

    // TR1: 10 ETUs of subcarrier for the reader's phase lock (80 samples)
    for _ in 0..20 {
        ts.stuffbit4(true);
    }

    for _ in 0..10 {
        ts.stuffbit4(false);
    }
    for _ in 0..2 {
        ts.stuffbit4(true);
    }

    for byte in msg {
        ts.stuffbit4(false);
        let mut b = *byte;
        for _ in 0..8 {
            ts.stuffbit4(b & 1 != 0);
            b >>= 1;
        }
        ts.stuffbit4(true);
    }

    for _ in 0..10 {
        ts.stuffbit4(false);
    }
    for _ in 0..2 {
        ts.stuffbit4(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collected(ts: &ToSend) -> std::vec::Vec<bool> {
        ts.symbols().collect()
    }

    #[test]
    fn test_reader_frame_shape() {
        let mut ts = ToSend::new();
        encode_reader(&mut ts, &[0x05]);
        let bits = collected(&ts);

        // SOF low, SOF high
        assert!(bits[..10].iter().all(|b| !*b));
        assert!(bits[10] && bits[11]);

        // one character: start, 8 data LSB-first, stop
        assert!(!bits[12]);
        let data: u8 = (0..8).fold(0, |acc, i| acc | u8::from(bits[13 + i]) << i);
        assert_eq!(data, 0x05);
        assert!(bits[21]);

        // EOF
        assert!(bits[22..32].iter().all(|b| !*b));

        // trailing pad keeps the line idle
        assert!(bits[32..40].iter().all(|b| *b));
    }

    #[test]
    fn test_reader_frame_is_byte_exact() {
        let mut ts = ToSend::new();
        encode_reader(&mut ts, &[0x05, 0x00, 0x08, 0x39, 0x73]);
        // 12 SOF + 5 * 10 + 10 EOF + 8 pad = 80 symbols = 10 bytes
        assert_eq!(ts.len(), 10);
    }

    #[test]
    fn test_tag_frame_prefixes_tr1() {
        let mut ts = ToSend::new();
        encode_tag(&mut ts, &[0x00, 0x78, 0xF0]);
        let bits = collected(&ts);

        // 80 samples of subcarrier before the SOF low phase
        assert!(bits[..80].iter().all(|b| *b));
        assert!(bits[80..120].iter().all(|b| !*b));

        // fully byte-aligned: 4 * (44 + 10 * 3) symbols
        assert_eq!(bits.len(), 4 * (44 + 10 * 3));
        assert_eq!(bits.len() % 8, 0);
    }

    #[test]
    fn test_encoders_reset_the_buffer() {
        let mut ts = ToSend::new();
        encode_tag(&mut ts, &[0xAA; 14]);
        let long = ts.len();
        encode_reader(&mut ts, &[0x0B]);
        assert!(ts.len() < long);

        // 12 + 10 + 10 + 8 symbols
        assert_eq!(ts.len(), 5);
    }
}
