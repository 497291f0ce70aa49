//! Transmit engine.
//!
//! Reader commands are pushed as pairs of 16-bit envelope words, one pair
//! per stuffbit, after aligning the start of transmission to the 16-tick
//! SSP grid; tag responses stream the encoded stuffbit bytes straight into
//! the TX register of the BPSK simulator.

use core::convert::Infallible;

use crate::consts::{DELAY_ARM_TO_TAG, TICKS_PER_ETU_READER};
use crate::encoding::ToSend;
use crate::hw::{Frontend, RfMode};

/// Nonblocking probe of the TX holding register.
fn tx_slot<F: Frontend>(frontend: &F) -> nb::Result<(), Infallible> {
    if frontend.tx_ready() {
        Ok(())
    } else {
        Err(nb::Error::WouldBlock)
    }
}

/// Ticks a reader-direction frame of `stuffbit_bytes` occupies on the wire.
pub fn reader_frame_ticks(stuffbit_bytes: usize) -> u32 {
    stuffbit_bytes as u32 * 8 * TICKS_PER_ETU_READER
}

/// SOF-inclusive offset from a decoded frame's EOF back to its SOF.
pub fn sof_offset(frame_len: u16) -> u32 {
    frame_len as u32 * 128 + 32 * 16
}

/// Transmits an encoded reader command, aligned to the SSP clock grid.
///
/// `start_time` carries the requested transmission tick in and the actual
/// one out; the caller schedules the next frame from it.
pub fn transmit_reader<F: Frontend>(frontend: &mut F, ts: &ToSend, start_time: &mut u32) {
    frontend.rf_mode(RfMode::ReaderSendShallow);

    if *start_time < DELAY_ARM_TO_TAG {
        *start_time = DELAY_ARM_TO_TAG;
    }
    *start_time = (*start_time - DELAY_ARM_TO_TAG) & !0xF;
    if frontend.ssp_clk_now() > *start_time {
        // missed the slot, take the next point on the grid
        *start_time = (frontend.ssp_clk_now() + 16) & !0xF;
    }
    while frontend.ssp_clk_now() < *start_time {
        frontend.watchdog_kick();
    }

    for byte in ts.data() {
        let mut data = *byte;
        for _ in 0..8 {
            // the envelope is inverted: a 1 stuffbit keeps the field up
            let word = if data & 0x80 != 0 { 0x0000 } else { 0xFFFF };
            while tx_slot(frontend).is_err() {
                frontend.watchdog_kick();
            }
            frontend.tx_push_word(word);
            while tx_slot(frontend).is_err() {
                frontend.watchdog_kick();
            }
            frontend.tx_push_word(word);
            data <<= 1;
        }
    }

    *start_time += DELAY_ARM_TO_TAG;
}

/// Streams an encoded tag response through the BPSK simulator.
pub fn transmit_tag<F: Frontend>(frontend: &mut F, response: &[u8]) {
    frontend.rf_mode(RfMode::SimulatorBpsk);

    // preload so the shifter starts on subcarrier
    frontend.tx_push_word(0x00FF);
    for byte in response {
        let _: Result<(), Infallible> = nb::block!(tx_slot(frontend));
        frontend.tx_push_word(*byte as u16);
    }
    frontend.tx_drain();
}
