//! Hardware collaborator contract.
//!
//! The engine never touches registers itself; everything platform-specific
//! sits behind [`Frontend`]. The trait models the FPGA mode word, the DMA
//! sample ring, the synchronous serial port (SSP) used for transmit and
//! for the simulator's envelope ingress, the HF field sensor, and the
//! housekeeping hooks (watchdog, host signalling, trace log).
//!
//! The user-cancellation button is deliberately *not* part of this trait:
//! it is a plain GPIO and the mode loops take it as an
//! [`embedded_hal::digital::InputPin`], so any pin type works.
//!
//! ## DMA contract
//!
//! `dma_start` arms the ring; `dma_pop` yields the next raw IQ byte pair
//! or `None` while the producer has not advanced past the consumer.
//! `dma_rewind_if_exhausted` re-arms both hardware counter registers with
//! the base pointer and a full-buffer length once they both reach zero,
//! which is the single wrap-handling obligation of the implementation.
//! There is exactly one producer (the DMA engine) and one consumer (the
//! calling mode loop) per epoch, so no locking is required.

/// RF front-end operating mode, written to the FPGA as a mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum RfMode {
    /// Reader transmit path: carrier on, shallow ASK modulation.
    ReaderSendShallow,
    /// Reader receive path: 848 kHz subcarrier correlator, IQ output.
    ReaderReceiveIq848,
    /// Passive sniffing: correlator output plus reader envelope bit.
    ReaderSniffIq848,
    /// Tag simulator, listening only.
    SimulatorNoMod,
    /// Tag simulator, BPSK load modulation from the TX register.
    SimulatorBpsk,
}

/// Everything the protocol engine needs from the platform.
pub trait Frontend {
    /// Switches the RF front-end mode word.
    fn rf_mode(&mut self, mode: RfMode);

    /// Arms the sample DMA over a ring of `len` bytes.
    fn dma_start(&mut self, len: usize);

    /// Pops the next raw sample byte pair, or `None` if the producer has
    /// not delivered one yet.
    fn dma_pop(&mut self) -> Option<(u8, u8)>;

    /// Re-arms the DMA counters if both have run down to zero.
    fn dma_rewind_if_exhausted(&mut self);

    /// Stops the sample DMA.
    fn dma_disable(&mut self);

    /// Current SSP clock, in ticks.
    fn ssp_clk_now(&self) -> u32;

    /// Restarts the SSP clock epoch.
    fn ssp_clk_start(&mut self);

    /// Whether the TX holding register can take another word.
    fn tx_ready(&self) -> bool;

    /// Pushes one word into the TX holding register.
    fn tx_push_word(&mut self, word: u16);

    /// Blocks until the TX shift register has emptied.
    fn tx_drain(&mut self);

    /// Whether the simulator ingress has an envelope byte ready.
    fn rx_ready(&self) -> bool;

    /// Pops one envelope byte (8 samples, MSB first) from the ingress.
    fn rx_pop(&mut self) -> u8;

    /// Whether the HF field envelope exceeds the minimum operating level.
    fn hf_field_present(&self) -> bool;

    /// Whether the host has pre-empting work for us.
    fn data_available(&self) -> bool;

    /// Refreshes the watchdog. Called from every busy-wait loop.
    fn watchdog_kick(&mut self);

    /// Records a frame with its antenna-referenced SOF/EOF timestamps.
    fn log_trace(&mut self, bytes: &[u8], sof_time: u32, eof_time: u32, reader_to_tag: bool);
}

impl<F: Frontend> Frontend for &mut F {
    fn rf_mode(&mut self, mode: RfMode) {
        (**self).rf_mode(mode)
    }
    fn dma_start(&mut self, len: usize) {
        (**self).dma_start(len)
    }
    fn dma_pop(&mut self) -> Option<(u8, u8)> {
        (**self).dma_pop()
    }
    fn dma_rewind_if_exhausted(&mut self) {
        (**self).dma_rewind_if_exhausted()
    }
    fn dma_disable(&mut self) {
        (**self).dma_disable()
    }
    fn ssp_clk_now(&self) -> u32 {
        (**self).ssp_clk_now()
    }
    fn ssp_clk_start(&mut self) {
        (**self).ssp_clk_start()
    }
    fn tx_ready(&self) -> bool {
        (**self).tx_ready()
    }
    fn tx_push_word(&mut self, word: u16) {
        (**self).tx_push_word(word)
    }
    fn tx_drain(&mut self) {
        (**self).tx_drain()
    }
    fn rx_ready(&self) -> bool {
        (**self).rx_ready()
    }
    fn rx_pop(&mut self) -> u8 {
        (**self).rx_pop()
    }
    fn hf_field_present(&self) -> bool {
        (**self).hf_field_present()
    }
    fn data_available(&self) -> bool {
        (**self).data_available()
    }
    fn watchdog_kick(&mut self) {
        (**self).watchdog_kick()
    }
    fn log_trace(&mut self, bytes: &[u8], sof_time: u32, eof_time: u32, reader_to_tag: bool) {
        (**self).log_trace(bytes, sof_time, eof_time, reader_to_tag)
    }
}

/// Size of the IQ sample ring, in bytes (one I byte and one Q byte per
/// sample pair).
pub const DMA_BUFFER_SIZE: usize = 1024;
