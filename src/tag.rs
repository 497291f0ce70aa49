//! Tag-emulation protocol state machine.
//!
//! Emulates a Type B card against a live reader: waits for the HF field,
//! answers REQB/WUPB with a canned ATQB, acknowledges ATTRIB and HLTB with
//! the short OK frame, and silently drops everything else. The two
//! responses are encoded once at construction so the answer path is a
//! straight buffer push.
//!
//! The machine never reports errors upward; a command it does not
//! understand is logged and the card falls back to idle.

use embedded_hal::digital::InputPin;
use heapless::Vec;

use crate::consts::{
    ISO14443B_ATTRIB, ISO14443B_HALT, ISO14443B_REQB, MAX_FRAME_SIZE, RECEIVE_BUFFER_LEN,
};
use crate::crc::{check_crc14b, crc14b_bytes};
use crate::encoding::{ToSend, encode_tag};
use crate::fmt::Bytes;
use crate::hw::{Frontend, RfMode};
use crate::transmit::transmit_tag;
use crate::uart::Uart;

/// Card-side protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum TagState {
    /// No reader field detected.
    NoField,
    /// Powered and addressable.
    Idle,
    /// Halted; only a WUPB with the wakeup bit set revives the card.
    Halted,
    /// Wakeup accepted, ATQB transmission pending.
    Selecting,
    /// HLTB accepted, OK transmission pending.
    Halting,
    /// ATTRIB accepted, OK transmission pending.
    Acknowledge,
    /// Selected and exchanging blocks.
    Work,
}

/// The ATQB of the default simulated card: PUPI `82 0D E1 74`, application
/// data `20 38 19 22`, 106 kbit/s both directions, 32-byte frames,
/// ISO 14443-4 support, FWI 8.
const RESP_ATQB: [u8; 14] = [
    0x50, 0x82, 0x0D, 0xE1, 0x74, 0x20, 0x38, 0x19, 0x22, 0x00, 0x21, 0x85, 0x5E, 0xD7,
];

/// Acknowledgement to ATTRIB and HLTB.
const RESP_OK: [u8; 3] = [0x00, 0x78, 0xF0];

/// Type B card emulator over a hardware front-end and a cancellation
/// button.
#[derive(Debug)]
pub struct TagSim<F, B>
where
    F: Frontend,
    B: InputPin,
{
    frontend: F,
    button: B,
    state: TagState,
    uart: Uart,
    atqb: [u8; 14],
    encoded_atqb: Vec<u8, 128>,
    encoded_ok: Vec<u8, 64>,
    cmds_received: u32,
}

impl<F, B> TagSim<F, B>
where
    F: Frontend,
    B: InputPin,
{
    /// Creates an emulator for the given PUPI.
    ///
    /// A zero `pupi` keeps the default card identity; anything else
    /// overwrites ATQB bytes 1..5 and regenerates the checksum.
    pub fn new(pupi: u32, frontend: F, button: B) -> Self {
        let mut atqb = RESP_ATQB;
        if pupi > 0 {
            atqb[1..5].copy_from_slice(&pupi.to_be_bytes());
            let crc = crc14b_bytes(&atqb[..12]);
            atqb[12..].copy_from_slice(&crc);
        }

        let mut ts = ToSend::new();
        encode_tag(&mut ts, &atqb);
        let encoded_atqb = Vec::from_slice(ts.data()).unwrap();
        encode_tag(&mut ts, &RESP_OK);
        let encoded_ok = Vec::from_slice(ts.data()).unwrap();

        Self {
            frontend,
            button,
            state: TagState::NoField,
            uart: Uart::new(MAX_FRAME_SIZE as u16),
            atqb,
            encoded_atqb,
            encoded_ok,
            cmds_received: 0,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> TagState {
        self.state
    }

    /// Commands handled since construction.
    pub fn cmds_received(&self) -> u32 {
        self.cmds_received
    }

    /// The (possibly PUPI-patched) ATQB this card answers with.
    pub fn atqb(&self) -> &[u8; 14] {
        &self.atqb
    }

    /// Releases the front-end and returns its parts.
    pub fn release(self) -> (F, B) {
        (self.frontend, self.button)
    }

    /// Powers the card up once the reader field is strong enough.
    ///
    /// Returns `true` while the card is addressable.
    pub fn check_field(&mut self) -> bool {
        if self.state == TagState::NoField {
            if !self.frontend.hf_field_present() {
                return false;
            }
            self.state = TagState::Idle;
        }
        true
    }

    /// Processes one received reader command.
    ///
    /// Classifies wakeups first, dispatches on the current state, then
    /// resolves the internal response states by transmitting.
    pub fn execute(&mut self, cmd: &[u8]) {
        self.cmds_received += 1;

        if cmd.len() == 5 && cmd[0] == ISO14443B_REQB {
            // REQB and WUPB share this test; only a halted card insists
            // on the wakeup bit
            let wake = match self.state {
                TagState::Idle => true,
                TagState::Halted => cmd[2] & 0x08 != 0,
                _ => false,
            };
            if wake {
                self.frontend.log_trace(cmd, 0, 0, true);
                self.state = TagState::Selecting;
            }
        }

        match self.state {
            TagState::Idle | TagState::Halted | TagState::NoField => {
                trace!("ignoring {}", Bytes(cmd));
                self.frontend.log_trace(cmd, 0, 0, true);
            }
            TagState::Work => {
                if cmd.len() == 7 && cmd[0] == ISO14443B_HALT {
                    self.frontend.log_trace(cmd, 0, 0, true);
                    self.state = TagState::Halting;
                } else if cmd.len() == 11 && cmd[0] == ISO14443B_ATTRIB {
                    self.frontend.log_trace(cmd, 0, 0, true);
                    self.state = TagState::Acknowledge;
                } else {
                    self.frontend.log_trace(cmd, 0, 0, true);
                    if cmd.len() >= 3 {
                        // checked for the log only; a bad block must not
                        // wedge the card
                        if check_crc14b(cmd) {
                            debug!("block crc passed: {}", Bytes(cmd));
                        } else {
                            debug!("block crc failed: {}", Bytes(cmd));
                        }
                    }
                    self.state = TagState::Idle;
                }
            }
            TagState::Selecting | TagState::Halting | TagState::Acknowledge => {}
        }

        self.run_internal();
    }

    /// Transmits whatever the internal states owe and settles the machine.
    fn run_internal(&mut self) {
        loop {
            match self.state {
                TagState::Selecting => {
                    transmit_tag(&mut self.frontend, &self.encoded_atqb);
                    let atqb = self.atqb;
                    self.frontend.log_trace(&atqb, 0, 0, false);
                    self.state = TagState::Work;
                }
                TagState::Halting => {
                    transmit_tag(&mut self.frontend, &self.encoded_ok);
                    self.frontend.log_trace(&RESP_OK, 0, 0, false);
                    self.state = TagState::Halted;
                }
                TagState::Acknowledge => {
                    transmit_tag(&mut self.frontend, &self.encoded_ok);
                    self.frontend.log_trace(&RESP_OK, 0, 0, false);
                    self.state = TagState::Idle;
                }
                _ => break,
            }
        }
    }

    /// Listens for one complete reader command.
    ///
    /// Returns `false` when cancelled by the button or pre-empted by the
    /// host.
    fn get_command(&mut self) -> bool {
        self.frontend.rf_mode(RfMode::SimulatorNoMod);
        self.uart.reset();
        loop {
            self.frontend.watchdog_kick();
            if self.button.is_high().unwrap_or(false) || self.frontend.data_available() {
                return false;
            }
            if !self.frontend.rx_ready() {
                continue;
            }
            let byte = self.frontend.rx_pop();
            for bit in 0..8 {
                if self.uart.feed(byte & (0x80 >> bit) != 0) {
                    return true;
                }
            }
        }
    }

    /// Emulation loop: field detection, command fetch, dispatch.
    ///
    /// Runs until the button is pressed or the host signals work.
    pub fn run(&mut self) {
        self.frontend.ssp_clk_start();
        self.state = TagState::NoField;

        loop {
            self.frontend.watchdog_kick();
            if self.button.is_high().unwrap_or(false) || self.frontend.data_available() {
                break;
            }

            if !self.check_field() {
                continue;
            }

            if !self.get_command() {
                break;
            }
            let cmd: Vec<u8, RECEIVE_BUFFER_LEN> = Vec::from_slice(self.uart.frame()).unwrap();
            self.execute(&cmd);
        }

        info!("tag emulation stopped after {} commands", self.cmds_received);
    }
}
