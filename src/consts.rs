//! Constants used across the ISO 14443 Type B implementation.
//!
//! This module defines the protocol-wide constants for buffer sizing,
//! command bytes, and the timing discipline of the transmit/receive path.
//!
//! ## Key Concepts
//!
//! - **ETU**: one Elementary Time Unit is 128 carrier cycles (~9.44 µs at
//!   13.56 MHz) and carries one bit on the wire.
//! - **SSP ticks**: the synchronous serial clock the transmit engine is
//!   gridded to. It runs at 13.56 MHz / 4 = 3.39 MHz in reader and sniffer
//!   modes and at 13.56 MHz / 32 = 423.75 kHz when simulating a tag, so all
//!   reader-side delays are multiples of 16.
//! - **FWT**: Frame Waiting Time, the maximum card response delay in ETUs,
//!   negotiated through the ATQB protocol-info bytes.
//!
//! The delay constants compensate the fixed latency of the FPGA/ARM path in
//! each direction so that trace timestamps line up on the antenna.

/// SSP ticks between ARM TX start and the field edge reaching the tag.
pub const DELAY_ARM_TO_TAG: u32 = 16;

/// SSP ticks between the tag's subcarrier edge and the sample reaching the ARM.
pub const DELAY_TAG_TO_ARM: u32 = 32;

/// SSP ticks of reader-to-ARM latency when simulating a tag.
pub const DELAY_READER_TO_ARM: u32 = 8;

/// SSP ticks of ARM-to-reader latency when simulating a tag.
pub const DELAY_ARM_TO_READER: u32 = 0;

/// Tag-to-ARM latency while sniffing (reader-grade SSP clock).
pub const DELAY_TAG_TO_ARM_SNIFF: u32 = 32;

/// Reader-to-ARM latency while sniffing.
pub const DELAY_READER_TO_ARM_SNIFF: u32 = 32;

/// Default Frame Waiting Time in ETUs (~3 s) until ATQB negotiates one.
pub const FWT_TIMEOUT_DEFAULT: u32 = 35_312;

/// Upper clamp for negotiated Frame Waiting Times, in ETUs.
pub const FWT_MAX: u32 = 40_542_464;

/// Sample pairs to wait for the first answer bit in a block exchange.
pub const ISO14443B_READER_TIMEOUT: u32 = 1700;

/// Minimum gap between the end of a tag response and the next reader
/// command, in SSP ticks (1024 / 3.39 MHz ≈ 302 µs).
pub const DELAY_ISO14443B_VICC_TO_VCD_READER: u32 = 600;

/// Guard between the end of a reader command and the opening of the
/// receive window, in SSP ticks.
pub const DELAY_ISO14443B_VCD_TO_VICC_READER: u32 = 600;

/// SSP ticks per ETU at the 3.39 MHz reader clock.
pub const TICKS_PER_ETU_READER: u32 = 32;

/// SSP ticks per IQ sample pair delivered by the 848 kHz correlator.
pub const TICKS_PER_SAMPLE: u32 = 16;

/// Subcarrier presence threshold for `max(|i|,|q|) + min(|i|,|q|)/2`.
pub const SUBCARRIER_DETECT_THRESHOLD: i32 = 8;

/// Largest Type B frame this engine receives or emulates, CRC included.
pub const MAX_FRAME_SIZE: usize = 256;

/// Receive buffer capacity: one frame plus PCB/CID/CRC headroom.
pub const RECEIVE_BUFFER_LEN: usize = MAX_FRAME_SIZE + 4;

/// Stuffbit buffer capacity in bytes.
///
/// Sized for the worst case, a tag-direction frame at 4× oversample:
/// 20 TR1 stuffbits, 12 of SOF, 10 per octet, 10 of EOF and 2 of padding,
/// each emitted four times, packed eight symbols per byte, plus the final
/// cursor advance.
pub const TOSEND_BUFFER_LEN: usize = (4 * (44 + 10 * RECEIVE_BUFFER_LEN) + 7) / 8 + 1;

/// REQB/WUPB command byte.
pub const ISO14443B_REQB: u8 = 0x05;

/// ATTRIB (select) command byte.
pub const ISO14443B_ATTRIB: u8 = 0x1D;

/// HLTB command byte.
pub const ISO14443B_HALT: u8 = 0x50;

/// SRx INITIATE command byte.
pub const ISO14443B_INITIATE: u8 = 0x06;

/// SRx SELECT command byte.
pub const ISO14443B_SELECT: u8 = 0x0E;

/// SRx GET UID command byte.
pub const ISO14443B_GET_UID: u8 = 0x0B;

/// SRx read-block command byte.
pub const ISO14443B_READ_BLK: u8 = 0x08;

/// ATQB answer byte (first octet of every Answer To Request, Type B).
pub const ISO14443B_ATQB: u8 = 0x50;
