//! Passive sniffer for a live reader/card conversation.
//!
//! One IQ stream feeds both decoders: the envelope bit riding in the LSB
//! of each sample goes to the ASK UART for the reader side, the amplitude
//! in the upper bits goes to the BPSK demodulator for the tag side. The
//! two are mutually exclusive (whichever decoder is inside a frame
//! silences the other), and the tag decoder only runs while a reader
//! command is awaiting its answer.

use embedded_hal::digital::InputPin;

use crate::consts::{
    DELAY_READER_TO_ARM_SNIFF, DELAY_TAG_TO_ARM_SNIFF, MAX_FRAME_SIZE, TICKS_PER_SAMPLE,
};
use crate::demod::Demod;
use crate::fmt::Bytes;
use crate::hw::{DMA_BUFFER_SIZE, Frontend, RfMode};
use crate::transmit::sof_offset;
use crate::uart::Uart;

/// Dual-decoder sniffer over a hardware front-end and a cancellation
/// button.
#[derive(Debug)]
pub struct Sniffer<F, B>
where
    F: Frontend,
    B: InputPin,
{
    frontend: F,
    button: B,
    demod: Demod,
    uart: Uart,
    expect_tag_answer: bool,
}

impl<F, B> Sniffer<F, B>
where
    F: Frontend,
    B: InputPin,
{
    /// Creates a sniffer.
    pub fn new(frontend: F, button: B) -> Self {
        Self {
            frontend,
            button,
            demod: Demod::new(MAX_FRAME_SIZE as u16),
            uart: Uart::new(MAX_FRAME_SIZE as u16),
            expect_tag_answer: false,
        }
    }

    /// Releases the front-end and returns its parts.
    pub fn release(self) -> (F, B) {
        (self.frontend, self.button)
    }

    /// Decodes both sides of the conversation until the button is pressed.
    ///
    /// Every decoded frame is handed to the trace log with its
    /// antenna-referenced timestamps and direction.
    pub fn run(&mut self) {
        self.frontend.rf_mode(RfMode::ReaderSniffIq848);
        self.frontend.ssp_clk_start();
        self.frontend.dma_start(DMA_BUFFER_SIZE);
        let dma_start_time = self.frontend.ssp_clk_now();

        self.demod.init(MAX_FRAME_SIZE as u16);
        self.uart.init(MAX_FRAME_SIZE as u16);
        self.expect_tag_answer = false;

        let mut samples: u32 = 0;
        loop {
            self.frontend.watchdog_kick();
            if self.button.is_high().unwrap_or(false) {
                break;
            }

            let Some((ci, cq)) = self.frontend.dma_pop() else {
                self.frontend.dma_rewind_if_exhausted();
                continue;
            };
            samples += 1;

            // reader side: the envelope bit, two samples per IQ pair
            if !self.demod.in_frame() {
                let mut done = self.uart.feed(ci & 0x01 != 0);
                if !done {
                    done = self.uart.feed(cq & 0x01 != 0);
                }
                if done {
                    let eof_time = (dma_start_time + samples * TICKS_PER_SAMPLE)
                        .saturating_sub(DELAY_READER_TO_ARM_SNIFF);
                    let sof_time = eof_time.saturating_sub(sof_offset(self.uart.len()));
                    debug!("sniffed reader frame {}", Bytes(self.uart.frame()));
                    self.frontend
                        .log_trace(self.uart.frame(), sof_time, eof_time, true);
                    self.uart.reset();
                    self.demod.reset();
                    self.expect_tag_answer = true;
                }
            }

            // tag side: the amplitude, only while an answer is due
            if !self.uart.in_frame()
                && self.expect_tag_answer
                && self.demod.feed((ci as i8) >> 1, (cq as i8) >> 1)
            {
                let eof_time = (dma_start_time + samples * TICKS_PER_SAMPLE)
                    .saturating_sub(DELAY_TAG_TO_ARM_SNIFF);
                let sof_time = eof_time.saturating_sub(sof_offset(self.demod.len()));
                debug!("sniffed tag frame {}", Bytes(self.demod.frame()));
                self.frontend
                    .log_trace(self.demod.frame(), sof_time, eof_time, false);
                self.uart.reset();
                self.demod.reset();
                self.expect_tag_answer = false;
            }
        }

        self.frontend.dma_disable();
        info!("sniffer stopped after {} samples", samples);
    }
}
