//! Reader-side protocol state machine.
//!
//! Drives a Type B card through wakeup (WUPB/ATQB), selection (ATTRIB) and
//! ISO 14443-4 block exchange, plus the non-standard SRx (ST short-range
//! memory tag) command set. One [`Reader`] owns the stuffbit buffer, the
//! BPSK demodulator and the session parameters negotiated from the ATQB,
//! and serializes every exchange through the shared transmit path.

use embedded_hal::digital::InputPin;
use heapless::Vec;

use crate::Error;
use crate::consts::{
    DELAY_ISO14443B_VCD_TO_VICC_READER, DELAY_ISO14443B_VICC_TO_VCD_READER, DELAY_TAG_TO_ARM,
    FWT_MAX, FWT_TIMEOUT_DEFAULT, ISO14443B_ATTRIB, ISO14443B_GET_UID, ISO14443B_HALT,
    ISO14443B_INITIATE, ISO14443B_READ_BLK, ISO14443B_READER_TIMEOUT, ISO14443B_REQB,
    ISO14443B_SELECT, MAX_FRAME_SIZE, RECEIVE_BUFFER_LEN, TICKS_PER_SAMPLE,
};
use crate::crc::{check_crc14b, crc14b_bytes};
use crate::demod::{Demod, DemodState};
use crate::encoding::{ToSend, encode_reader};
use crate::fmt::Bytes;
use crate::hw::{DMA_BUFFER_SIZE, Frontend, RfMode};
use crate::transmit::{reader_frame_ticks, sof_offset, transmit_reader};

/// Identity of the currently selected card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct CardInfo {
    /// PUPI for standard cards, full UID for SRx tags.
    pub uid: [u8; 8],
    /// Valid length of `uid`: 4 for Type B anticollision, 8 for SRx.
    pub uidlen: u8,
    /// Application data and protocol info from the ATQB (bytes 5..12).
    pub atqb: [u8; 7],
    /// MBLI/CID byte of the ATTRIB response.
    pub cid: u8,
    /// SRx chip identifier.
    pub chipid: u8,
}

/// Decodes the ATQB maximum-frame-size nibble into bytes.
pub fn atqb_frame_size(nibble: u8) -> u16 {
    match nibble {
        0..=4 => 8 * nibble as u16 + 16,
        5 => 64,
        6 => 96,
        7 => 128,
        8 => 256,
        _ => 257,
    }
}

/// Frame Waiting Time in ETUs for an ATQB FWI nibble.
///
/// Values of 16 and up are reserved and yield `None`, leaving the current
/// timeout untouched.
pub fn fwi_timeout(fwi: u8) -> Option<u32> {
    (fwi < 16).then(|| 302u32 << fwi)
}

/// Reader-mode protocol engine over a hardware front-end and a
/// cancellation button.
#[derive(Debug)]
pub struct Reader<F, B>
where
    F: Frontend,
    B: InputPin,
{
    frontend: F,
    button: B,
    demod: Demod,
    tosend: ToSend,

    /// ISO 14443-4 I-block toggle bit.
    pcb_blocknum: u8,
    /// Frame Waiting Time in ETUs, negotiated from the ATQB.
    timeout_etu: u32,
    /// Negotiated maximum frame size in bytes.
    max_frame_size: u16,

    /// Scheduled tick for the next transmission.
    start_time: u32,
    /// Antenna-referenced end of the most recent frame, either direction.
    eof_time: u32,
}

impl<F, B> Reader<F, B>
where
    F: Frontend,
    B: InputPin,
{
    /// Creates a reader with the default session parameters.
    pub fn new(frontend: F, button: B) -> Self {
        Self {
            frontend,
            button,
            demod: Demod::new(MAX_FRAME_SIZE as u16),
            tosend: ToSend::new(),
            pcb_blocknum: 0,
            timeout_etu: FWT_TIMEOUT_DEFAULT,
            max_frame_size: MAX_FRAME_SIZE as u16,
            start_time: 0,
            eof_time: 0,
        }
    }

    /// Brings the field up in receive mode and restarts the clock epoch.
    pub fn setup(&mut self) {
        self.frontend.rf_mode(RfMode::ReaderReceiveIq848);
        self.frontend.ssp_clk_start();
        self.start_time = 0;
        self.eof_time = 0;
        self.pcb_blocknum = 0;
    }

    /// Releases the front-end and returns its parts.
    pub fn release(self) -> (F, B) {
        (self.frontend, self.button)
    }

    /// Sets the Frame Waiting Time, clamped to the protocol maximum.
    pub fn set_timeout(&mut self, etu: u32) {
        self.timeout_etu = etu.min(FWT_MAX);
        debug!("fwt timeout now {} etu", self.timeout_etu);
    }

    /// Current Frame Waiting Time in ETUs.
    pub fn timeout(&self) -> u32 {
        self.timeout_etu
    }

    /// Sets the maximum frame size negotiated with the card.
    pub fn set_max_frame_size(&mut self, size: u16) {
        self.max_frame_size = size.min(257);
        debug!("max frame size now {}", self.max_frame_size);
    }

    /// Current maximum frame size in bytes.
    pub fn max_frame_size(&self) -> u16 {
        self.max_frame_size
    }

    /// Current I-block toggle bit.
    pub fn pcb_blocknum(&self) -> u8 {
        self.pcb_blocknum
    }

    /// Accept SOF-only responses as valid empty frames.
    pub fn set_sof_only_ok(&mut self, ok: bool) {
        self.demod.set_sof_only_ok(ok);
    }

    /// Encodes and transmits `cmd`, updating the frame clock.
    fn send_cmd(&mut self, cmd: &[u8]) {
        trace!("tx {}", Bytes(cmd));
        encode_reader(&mut self.tosend, cmd);
        transmit_reader(&mut self.frontend, &self.tosend, &mut self.start_time);
        self.eof_time = self.start_time + reader_frame_ticks(self.tosend.len());
        self.frontend
            .log_trace(cmd, self.start_time, self.eof_time, true);
    }

    /// Runs the sample loop until a tag frame or a timeout.
    ///
    /// On success the decoded frame is in `self.demod` and `eof_time`
    /// points at its end on the antenna.
    fn get_answer(&mut self, timeout: u32, max_len: u16) -> Result<u16, Error> {
        self.demod.init(max_len);
        self.frontend.rf_mode(RfMode::ReaderReceiveIq848);
        self.frontend.dma_start(DMA_BUFFER_SIZE);
        let dma_start_time = self.frontend.ssp_clk_now();

        let mut samples: u32 = 0;
        let ret = loop {
            self.frontend.watchdog_kick();
            if self.button.is_high().unwrap_or(false) {
                break Err(Error::Cancelled);
            }

            let Some((ci, cq)) = self.frontend.dma_pop() else {
                self.frontend.dma_rewind_if_exhausted();
                continue;
            };
            samples += 1;

            if self.demod.feed(ci as i8, cq as i8) {
                self.eof_time = dma_start_time + samples * TICKS_PER_SAMPLE - DELAY_TAG_TO_ARM;
                if self.demod.overflowed() {
                    break Err(Error::BufferOverflow);
                }
                break Ok(self.demod.len());
            }

            if samples > timeout && self.demod.state() <= DemodState::PhaseRefTraining {
                break Err(Error::Timeout);
            }
        };
        self.frontend.dma_disable();

        match ret {
            Ok(len) => {
                let sof_time = self.eof_time.saturating_sub(sof_offset(len));
                self.frontend
                    .log_trace(self.demod.frame(), sof_time, self.eof_time, false);
                trace!("rx {}", Bytes(self.demod.frame()));
            }
            Err(e) => debug!("rx failed: {:?}", e),
        }
        ret
    }

    /// Standard Type B anticollision and selection.
    ///
    /// Wakes the card with WUPB, validates the ATQB, selects it with
    /// ATTRIB and applies the negotiated frame size and Frame Waiting
    /// Time. On success the I-block toggle is reset.
    pub fn select_card(&mut self, card: Option<&mut CardInfo>) -> Result<(), Error> {
        static WUPB: [u8; 5] = [ISO14443B_REQB, 0x00, 0x08, 0x39, 0x73];

        self.send_cmd(&WUPB);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen < 14 {
            return Err(Error::FrameTooShort);
        }
        let mut r_atqb = [0u8; 14];
        r_atqb.copy_from_slice(&self.demod.frame()[..14]);
        if !check_crc14b(&r_atqb) {
            return Err(Error::CrcMismatch);
        }

        // ATTRIB: our PUPI copy, TR0/TR1 defaults, 256-byte frames, the
        // card's protocol type, CID 0
        let mut attrib = [0u8; 11];
        attrib[0] = ISO14443B_ATTRIB;
        attrib[1..5].copy_from_slice(&r_atqb[1..5]);
        attrib[5] = 0x00;
        attrib[6] = 0x08;
        attrib[7] = r_atqb[10] & 0x0F;
        attrib[8] = 0x00;
        let crc = crc14b_bytes(&attrib[..9]);
        attrib[9..].copy_from_slice(&crc);

        self.start_time = self.eof_time + DELAY_ISO14443B_VICC_TO_VCD_READER;
        self.send_cmd(&attrib);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen < 3 {
            return Err(Error::FrameTooShort);
        }
        if !check_crc14b(&self.demod.frame()[..3]) {
            return Err(Error::CrcMismatch);
        }

        if let Some(card) = card {
            card.uid.fill(0);
            card.uid[..4].copy_from_slice(&r_atqb[1..5]);
            card.uidlen = 4;
            card.atqb.copy_from_slice(&r_atqb[5..12]);
            card.cid = self.demod.frame()[0];
        }

        // apply the parameters the card advertised in its ATQB
        if let Some(fwt) = fwi_timeout(r_atqb[11] >> 4) {
            self.set_timeout(fwt);
        }
        self.set_max_frame_size(atqb_frame_size(r_atqb[10] >> 4));
        self.pcb_blocknum = 0;
        Ok(())
    }

    /// SRx (ST short-range) selection: INITIATE, SELECT, GET UID.
    pub fn select_srx_card(&mut self, card: Option<&mut CardInfo>) -> Result<(), Error> {
        static INIT_SRX: [u8; 4] = [ISO14443B_INITIATE, 0x00, 0x97, 0x5B];

        self.send_cmd(&INIT_SRX);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen == 0 {
            return Err(Error::FrameTooShort);
        }
        let chipid = self.demod.frame()[0];

        let mut select = [ISO14443B_SELECT, chipid, 0x00, 0x00];
        let crc = crc14b_bytes(&select[..2]);
        select[2..].copy_from_slice(&crc);

        self.start_time = self.eof_time + DELAY_ISO14443B_VICC_TO_VCD_READER;
        self.send_cmd(&select);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen != 3 {
            return Err(Error::FrameTooShort);
        }
        if !check_crc14b(&self.demod.frame()[..3]) {
            return Err(Error::CrcMismatch);
        }
        if self.demod.frame()[0] != chipid {
            debug!("srx select echoed {:02x}", self.demod.frame()[0]);
            return Err(Error::Framing);
        }

        let mut get_uid = [ISO14443B_GET_UID, 0x00, 0x00];
        let crc = crc14b_bytes(&get_uid[..1]);
        get_uid[1..].copy_from_slice(&crc);

        self.start_time = self.eof_time + DELAY_ISO14443B_VICC_TO_VCD_READER;
        self.send_cmd(&get_uid);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen != 10 {
            return Err(Error::FrameTooShort);
        }
        if !check_crc14b(&self.demod.frame()[..10]) {
            return Err(Error::CrcMismatch);
        }

        if let Some(card) = card {
            card.uid.copy_from_slice(&self.demod.frame()[..8]);
            card.uidlen = 8;
            card.chipid = chipid;
        }
        Ok(())
    }

    /// One ISO 14443-4 block exchange.
    ///
    /// Frames `inf` into an I-block, toggling the PCB block number at
    /// build time, and copies the card's response (CRC included) into
    /// `response`. Any failure (timeout, short frame, bad CRC, oversized
    /// payload) is reported as a zero-length response, matching the
    /// block-exchange contract upper layers expect.
    pub fn apdu(&mut self, inf: &[u8], response: &mut [u8]) -> usize {
        let mut frame: Vec<u8, RECEIVE_BUFFER_LEN> = Vec::new();

        // PCB with the alternating block number, then CID 0
        let _ = frame.push(0x0A | self.pcb_blocknum);
        self.pcb_blocknum ^= 1;
        let _ = frame.push(0x00);
        if frame.extend_from_slice(inf).is_err() {
            debug!("apdu payload of {} bytes does not fit", inf.len());
            return 0;
        }
        let crc = crc14b_bytes(&frame);
        if frame.extend_from_slice(&crc).is_err() {
            return 0;
        }

        self.start_time = self.eof_time + DELAY_ISO14443B_VICC_TO_VCD_READER;
        self.send_cmd(&frame);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;

        let len = match self.get_answer(ISO14443B_READER_TIMEOUT, self.max_frame_size) {
            Ok(len) => len as usize,
            Err(e) => {
                debug!("apdu exchange failed: {:?}", e);
                return 0;
            }
        };
        if len < 3 {
            return 0;
        }
        if !check_crc14b(&self.demod.frame()[..len]) {
            debug!("apdu response crc failed");
            return 0;
        }
        if response.len() < len {
            debug!("apdu response buffer too small for {} bytes", len);
            return 0;
        }
        response[..len].copy_from_slice(&self.demod.frame()[..len]);
        len
    }

    /// Reads one 4-byte SRx memory block.
    pub fn read_st_block(&mut self, blocknr: u8, block: &mut [u8; 4]) -> Result<(), Error> {
        let mut cmd = [ISO14443B_READ_BLK, blocknr, 0x00, 0x00];
        let crc = crc14b_bytes(&cmd[..2]);
        cmd[2..].copy_from_slice(&crc);

        self.start_time = self.eof_time + DELAY_ISO14443B_VICC_TO_VCD_READER;
        self.send_cmd(&cmd);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen < 6 {
            return Err(Error::FrameTooShort);
        }
        if !check_crc14b(&self.demod.frame()[..6]) {
            return Err(Error::CrcMismatch);
        }
        block.copy_from_slice(&self.demod.frame()[..4]);
        Ok(())
    }

    /// Dumps consecutive SRx blocks into `out`, 4 bytes per block.
    ///
    /// Stops early if `out` fills up; returns the bytes written.
    pub fn read_st_memory(&mut self, blocks: u8, out: &mut [u8]) -> Result<usize, Error> {
        let mut written = 0;
        for blocknr in 0..blocks {
            if out.len() - written < 4 {
                debug!("st dump stopped at block {}, buffer full", blocknr);
                break;
            }
            let mut block = [0u8; 4];
            self.read_st_block(blocknr, &mut block)?;
            out[written..written + 4].copy_from_slice(&block);
            written += 4;
        }
        Ok(written)
    }

    /// Halts the selected card.
    pub fn halt(&mut self, pupi: &[u8; 4]) -> Result<(), Error> {
        let mut cmd = [0u8; 7];
        cmd[0] = ISO14443B_HALT;
        cmd[1..5].copy_from_slice(pupi);
        let crc = crc14b_bytes(&cmd[..5]);
        cmd[5..].copy_from_slice(&crc);

        self.start_time = self.eof_time + DELAY_ISO14443B_VICC_TO_VCD_READER;
        self.send_cmd(&cmd);
        self.eof_time += DELAY_ISO14443B_VCD_TO_VICC_READER;
        let retlen = self.get_answer(self.timeout_etu, MAX_FRAME_SIZE as u16)?;
        if retlen < 3 {
            return Err(Error::FrameTooShort);
        }
        if !check_crc14b(&self.demod.frame()[..3]) {
            return Err(Error::CrcMismatch);
        }
        if self.demod.frame()[0] != 0x00 {
            return Err(Error::Framing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atqb_frame_size_table() {
        let expected: [u16; 9] = [16, 24, 32, 40, 48, 64, 96, 128, 256];
        for (nibble, want) in expected.iter().enumerate() {
            assert_eq!(atqb_frame_size(nibble as u8), *want);
        }
        for nibble in 9..=15 {
            assert_eq!(atqb_frame_size(nibble), 257);
        }
    }

    #[test]
    fn test_fwi_timeout_scaling() {
        for fwi in 0..16 {
            assert_eq!(fwi_timeout(fwi), Some(302 << fwi));
        }
        assert_eq!(fwi_timeout(16), None);
        assert_eq!(fwi_timeout(255), None);
    }

    #[test]
    fn test_fwi_eight_is_77312_etu() {
        assert_eq!(fwi_timeout(8), Some(77_312));
    }
}
