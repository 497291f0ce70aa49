//! # iso14b
//!
//! A portable, `no_std` ISO/IEC 14443 Type B protocol engine for bare-metal
//! targets driving an RF front-end that delivers IQ samples of the 13.56 MHz
//! carrier at its 847.5 kHz subcarrier.
//!
//! The crate implements the three operating modes of a contactless bench
//! tool over one sample stream and one transmit path:
//!
//! - **Reader**: ASK-modulated commands out, BPSK subcarrier answers in
//!   ([`reader::Reader`])
//! - **Tag emulation**: reader commands in via the envelope UART, canned
//!   BPSK responses out ([`tag::TagSim`])
//! - **Sniffer**: both sides of a live conversation decoded passively
//!   ([`sniffer::Sniffer`])
//!
//! Everything platform-specific (FPGA mode words, the DMA sample ring,
//! the SSP clock and TX register, watchdog, trace log) sits behind the
//! [`hw::Frontend`] trait; the cancellation button is any
//! `embedded_hal::digital::InputPin`.
//!
//! ## Crate features
//! | Feature     | Description |
//! |-------------|-------------|
//! | `std`       | Disables `#![no_std]`, for host-side testing |
//! | `defmt-0-3` | Routes logging through `defmt` and derives `defmt::Format` on public types |
//! | `log`       | Routes logging through the `log` crate |
//!
//! ## Usage
//!
//! ```rust
//! use iso14b::hw::{Frontend, RfMode};
//! use iso14b::reader::Reader;
//! # use embedded_hal_mock::eh1::digital::Mock as Pin;
//! # struct NullFrontend;
//! # impl Frontend for NullFrontend {
//! #     fn rf_mode(&mut self, _mode: RfMode) {}
//! #     fn dma_start(&mut self, _len: usize) {}
//! #     fn dma_pop(&mut self) -> Option<(u8, u8)> { None }
//! #     fn dma_rewind_if_exhausted(&mut self) {}
//! #     fn dma_disable(&mut self) {}
//! #     fn ssp_clk_now(&self) -> u32 { 0 }
//! #     fn ssp_clk_start(&mut self) {}
//! #     fn tx_ready(&self) -> bool { true }
//! #     fn tx_push_word(&mut self, _word: u16) {}
//! #     fn tx_drain(&mut self) {}
//! #     fn rx_ready(&self) -> bool { false }
//! #     fn rx_pop(&mut self) -> u8 { 0 }
//! #     fn hf_field_present(&self) -> bool { false }
//! #     fn data_available(&self) -> bool { false }
//! #     fn watchdog_kick(&mut self) {}
//! #     fn log_trace(&mut self, _b: &[u8], _s: u32, _e: u32, _r: bool) {}
//! # }
//! fn main() {
//!     # let button = Pin::new(&[]);
//!     let mut reader = Reader::new(NullFrontend, button);
//!     reader.setup();
//!     // reader.select_card(Some(&mut card)) ... once samples flow
//!     # let (_, mut button) = reader.release();
//!     # button.done();
//! }
//! ```
//!
//! ## Integration notes
//!
//! - The engine is single-threaded and interrupt-free: every mode is a
//!   cooperative busy-poll loop that refreshes the watchdog and honours
//!   the cancellation button.
//! - Decoder state machines are owned values; nothing in the crate is a
//!   process-wide singleton.
//! - The per-sample decode paths are straight-line integer code with no
//!   allocation; on targets that execute from slow flash, place them in
//!   RAM so DMA never outruns the consumer.
//! - Only the 106 kbit/s bit rate of ISO 14443-3 is supported, and no
//!   collision resolution is attempted: the first answering card wins.

#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(missing_docs, unused)]
#![cfg_attr(not(feature = "std"), no_std)]

#[macro_use]
mod fmt;

pub mod consts;
pub mod crc;
pub mod demod;
pub mod encoding;
pub mod hw;
pub mod reader;
pub mod sniffer;
pub mod tag;
pub mod transmit;
pub mod uart;

#[cfg(test)]
pub(crate) mod mock;

/// Failure classes of the protocol engine.
///
/// The decoders additionally report two conditions through the log only,
/// since they recover from them locally: a lost subcarrier sync
/// ([`Error::SyncLost`]) makes the decoder fall back to listening, and a
/// start/stop-bit violation ([`Error::Framing`]) discards the frame in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Error {
    /// Decoder regressed to unsynced mid-frame.
    #[error("subcarrier sync lost mid-frame")]
    SyncLost,
    /// Start/stop bits violated, or a response echoed the wrong content.
    #[error("frame structure violated")]
    Framing,
    /// Response shorter than the exchange requires.
    #[error("response too short")]
    FrameTooShort,
    /// More bytes decoded than the negotiated maximum frame size.
    #[error("receive buffer overflow")]
    BufferOverflow,
    /// Frame shape valid but the CRC_B check failed.
    #[error("crc mismatch")]
    CrcMismatch,
    /// No answer within the frame waiting time.
    #[error("timeout waiting for subcarrier")]
    Timeout,
    /// The user cancelled the operation.
    #[error("cancelled by button press")]
    Cancelled,
}
