//! Scripted front-end and button for host-side tests.
//!
//! `MockFrontend` replays prepared IQ and envelope streams, records every
//! transmitted word, mode switch and trace entry, and keeps the SSP clock
//! moving so grid-aligned waits terminate. Frame synthesis goes through
//! the real encoders, so these scripts exercise the same physical framing
//! the hardware would see.

use core::cell::Cell;
use core::convert::Infallible;
use std::collections::VecDeque;

use embedded_hal::digital::{ErrorType, InputPin};

use crate::encoding::{ToSend, encode_reader, encode_tag};
use crate::hw::{Frontend, RfMode};

/// A recorded trace entry: frame bytes, SOF tick, EOF tick, direction.
pub type TraceEntry = (Vec<u8>, u32, u32, bool);

/// Replayable, recording front-end.
#[derive(Debug, Default)]
pub struct MockFrontend {
    clock: Cell<u32>,
    /// IQ byte pairs handed out by `dma_pop`; endless silence once drained.
    pub iq: VecDeque<(u8, u8)>,
    /// Envelope bytes handed out by `rx_pop`.
    pub rx: VecDeque<u8>,
    /// `dma_pop` returns `None` this many times before delivering.
    pub starve: u32,
    /// Every word pushed at the TX register.
    pub tx_words: Vec<u16>,
    /// Every RF mode switch, in order.
    pub modes: Vec<RfMode>,
    /// Every `log_trace` call.
    pub trace: Vec<TraceEntry>,
    /// Simulated HF field presence.
    pub field: bool,
    /// Simulated host pre-emption signal.
    pub host_data: bool,
    /// Report `data_available` once all scripted input is consumed, so
    /// run loops wind down instead of busy-waiting forever.
    pub auto_stop: bool,
    /// Watchdog refreshes seen.
    pub kicks: u32,
    /// DMA rewinds requested.
    pub rewinds: u32,
}

impl MockFrontend {
    /// Queues `n` pairs of dead air.
    pub fn queue_silence(&mut self, n: usize) {
        for _ in 0..n {
            self.iq.push_back((0, 0));
        }
    }

    /// Queues a tag response as the correlator would deliver it: a little
    /// leading silence, then one IQ pair per two stuffbits, in phase with
    /// the reference for logic 1 and reversed for logic 0.
    pub fn queue_tag_frame(&mut self, msg: &[u8]) {
        self.queue_silence(16);
        let mut ts = ToSend::new();
        encode_tag(&mut ts, msg);
        let bits: Vec<bool> = ts.symbols().collect();
        for half in bits.chunks(2) {
            let level: i8 = if half[0] { 40 } else { -40 };
            self.iq.push_back((level as u8, level as u8));
        }
    }

    /// Queues a reader command as the simulator ingress would deliver it:
    /// four envelope samples per ETU, packed eight to a byte MSB-first.
    pub fn queue_reader_envelope(&mut self, msg: &[u8]) {
        let mut ts = ToSend::new();
        encode_reader(&mut ts, msg);
        let bits: Vec<bool> = ts.symbols().flat_map(|bit| [bit; 4]).collect();
        for chunk in bits.chunks(8) {
            let mut byte = 0u8;
            for (i, bit) in chunk.iter().enumerate() {
                if *bit {
                    byte |= 0x80 >> i;
                }
            }
            self.rx.push_back(byte);
        }
    }

    /// Queues `n` pairs of sniffer idle: envelope high, no subcarrier.
    pub fn sniff_idle(&mut self, n: usize) {
        for _ in 0..n {
            self.iq.push_back((1, 1));
        }
    }

    /// Queues a reader command for the sniffer: the envelope bit in the
    /// LSB of each sample, two samples per IQ pair.
    pub fn sniff_reader_frame(&mut self, msg: &[u8]) {
        let mut ts = ToSend::new();
        encode_reader(&mut ts, msg);
        let bits: Vec<bool> = ts.symbols().flat_map(|bit| [bit; 4]).collect();
        for pair in bits.chunks(2) {
            self.iq.push_back((pair[0] as u8, pair[1] as u8));
        }
    }

    /// Queues a tag response for the sniffer: the amplitude in the upper
    /// bits, envelope LSB clear.
    pub fn sniff_tag_frame(&mut self, msg: &[u8]) {
        let mut ts = ToSend::new();
        encode_tag(&mut ts, msg);
        let bits: Vec<bool> = ts.symbols().collect();
        for half in bits.chunks(2) {
            let level: i8 = if half[0] { 80 } else { -80 };
            self.iq.push_back((level as u8, level as u8));
        }
    }
}

impl Frontend for MockFrontend {
    fn rf_mode(&mut self, mode: RfMode) {
        self.modes.push(mode);
    }

    fn dma_start(&mut self, _len: usize) {}

    fn dma_pop(&mut self) -> Option<(u8, u8)> {
        if self.starve > 0 {
            self.starve -= 1;
            return None;
        }
        Some(self.iq.pop_front().unwrap_or((0, 0)))
    }

    fn dma_rewind_if_exhausted(&mut self) {
        self.rewinds += 1;
    }

    fn dma_disable(&mut self) {}

    fn ssp_clk_now(&self) -> u32 {
        let now = self.clock.get();
        self.clock.set(now + 16);
        now
    }

    fn ssp_clk_start(&mut self) {
        self.clock.set(0);
    }

    fn tx_ready(&self) -> bool {
        true
    }

    fn tx_push_word(&mut self, word: u16) {
        self.tx_words.push(word);
    }

    fn tx_drain(&mut self) {}

    fn rx_ready(&self) -> bool {
        !self.rx.is_empty()
    }

    fn rx_pop(&mut self) -> u8 {
        self.rx.pop_front().unwrap_or(0xFF)
    }

    fn hf_field_present(&self) -> bool {
        self.field
    }

    fn data_available(&self) -> bool {
        self.host_data || (self.auto_stop && self.iq.is_empty() && self.rx.is_empty())
    }

    fn watchdog_kick(&mut self) {
        self.kicks += 1;
    }

    fn log_trace(&mut self, bytes: &[u8], sof_time: u32, eof_time: u32, reader_to_tag: bool) {
        self.trace
            .push((bytes.to_vec(), sof_time, eof_time, reader_to_tag));
    }
}

/// Button that answers a scripted sequence, then a default level.
#[derive(Debug)]
pub struct MockButton {
    presses: VecDeque<bool>,
    default: bool,
}

impl MockButton {
    /// A button that is never pressed.
    pub fn idle() -> Self {
        Self {
            presses: VecDeque::new(),
            default: false,
        }
    }

    /// A button that stays up for `n` polls, then latches pressed.
    pub fn press_after(n: usize) -> Self {
        Self {
            presses: std::iter::repeat_n(false, n).collect(),
            default: true,
        }
    }
}

impl ErrorType for MockButton {
    type Error = Infallible;
}

impl InputPin for MockButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.presses.pop_front().unwrap_or(self.default))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.is_high()?)
    }
}
