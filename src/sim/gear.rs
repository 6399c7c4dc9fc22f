//! Simulated control gear.
//!
//! A [`SimGear`] handles decoded 16-bit forward frames and answers with a
//! backward frame value where the standard requires one. It keeps just
//! enough state for addressing, levels and the commissioning procedure.
//!
//! Real gear recognizes send-twice commands by timing; so does this one:
//! a configuration or twice-special command acts on the second identical
//! frame seen within 100 ms.

use crate::common::MASK;
use rand::Rng;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitialisationState {
    Enabled,
    Disabled,
    Withdrawn,
}

pub struct SimGear {
    pub short_address: u8,
    pub random_address: u32,
    /// Deterministic value adopted on RANDOMISE; `None` rolls a fresh one.
    pub next_random: Option<u32>,
    pub search_address: u32,
    pub initialisation_state: InitialisationState,
    pub actual_level: u8,
    pub gear_groups: u16,
    pub dtr0: u8,
    last_frame: Option<([u8; 2], u64)>,
}

impl SimGear {
    pub fn new() -> SimGear {
        SimGear {
            short_address: MASK,
            random_address: 0xff_ffff,
            next_random: None,
            search_address: 0xff_ffff,
            initialisation_state: InitialisationState::Disabled,
            actual_level: 0xfe,
            gear_groups: 0,
            dtr0: 0,
            last_frame: None,
        }
    }

    /// Fix the random address, both now and for future RANDOMISE.
    pub fn with_random(mut self, random: u32) -> SimGear {
        self.random_address = random;
        self.next_random = Some(random);
        self
    }

    pub fn with_short_address(mut self, addr: u8) -> SimGear {
        self.short_address = addr;
        self
    }

    pub fn with_level(mut self, level: u8) -> SimGear {
        self.actual_level = level;
        self
    }

    /// Handle one forward frame. `Some(value)` is the backward frame this
    /// device transmits.
    pub fn forward16(&mut self, frame: [u8; 2], now_us: u64) -> Option<u8> {
        let confirmed = self.track_repeat(frame, now_us);
        let addr = frame[0] >> 1;
        match addr {
            0x00..=0x3f => {
                if addr == self.short_address {
                    self.addressed(frame, confirmed)
                } else {
                    None
                }
            }
            0x40..=0x4f => {
                if self.gear_groups & (1 << (addr & 0x0f)) != 0 {
                    self.addressed(frame, confirmed)
                } else {
                    None
                }
            }
            0x7f => self.addressed(frame, confirmed),
            _ => self.special(frame, confirmed),
        }
    }

    fn addressed(&mut self, frame: [u8; 2], confirmed: bool) -> Option<u8> {
        if frame[0] & 1 == 0 {
            // Direct arc power; MASK means "no change".
            if frame[1] != MASK {
                self.actual_level = frame[1];
            }
            return None;
        }
        self.device_cmd(frame[1], confirmed)
    }

    fn device_cmd(&mut self, cmd: u8, confirmed: bool) -> Option<u8> {
        // Configuration commands act on the confirming transmission only.
        if (0x20..=0x8e).contains(&cmd) && !confirmed {
            return None;
        }
        match cmd {
            0x00 => {
                self.actual_level = 0;
                None
            }
            0x20 => {
                self.actual_level = 0xfe;
                self.dtr0 = 0;
                None
            }
            // Adopt the short address staged in DTR0.
            0x80 => {
                if self.dtr0 == MASK {
                    self.short_address = MASK;
                } else if self.dtr0 & 0x81 == 0x01 {
                    self.short_address = self.dtr0 >> 1;
                }
                None
            }
            0x90 => Some(self.status()),
            0x91 => Some(0xff),
            0x96 => {
                if self.short_address == MASK {
                    Some(0xff)
                } else {
                    None
                }
            }
            0xa0 => Some(self.actual_level),
            0xc2 => Some((self.random_address >> 16) as u8),
            0xc3 => Some((self.random_address >> 8) as u8),
            0xc4 => Some(self.random_address as u8),
            _ => None,
        }
    }

    fn special(&mut self, frame: [u8; 2], confirmed: bool) -> Option<u8> {
        let data = frame[1];
        match frame[0] {
            // TERMINATE
            0xa1 => {
                self.initialisation_state = InitialisationState::Disabled;
                None
            }
            // DTR0
            0xa3 => {
                self.dtr0 = data;
                None
            }
            // INITIALISE
            0xa5 => {
                let selected = data == 0x00
                    || (data == 0xff && self.short_address == MASK)
                    || (data & 0x81 == 0x01 && data >> 1 == self.short_address);
                if confirmed && selected {
                    self.initialisation_state = InitialisationState::Enabled;
                }
                None
            }
            // RANDOMISE
            0xa7 => {
                if confirmed && self.initialisation_state != InitialisationState::Disabled {
                    self.random_address = match self.next_random {
                        Some(random) => random,
                        None => rand::thread_rng().gen_range(0..0x0100_0000),
                    };
                }
                None
            }
            // COMPARE
            0xa9 => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address <= self.search_address
                {
                    Some(0xff)
                } else {
                    None
                }
            }
            // WITHDRAW
            0xab => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address == self.search_address
                {
                    self.initialisation_state = InitialisationState::Withdrawn;
                }
                None
            }
            // SEARCHADDR H/M/L
            0xb1 => {
                if self.initialisation_state != InitialisationState::Disabled {
                    self.search_address =
                        (self.search_address & 0x00_ffff) | ((data as u32) << 16);
                }
                None
            }
            0xb3 => {
                if self.initialisation_state != InitialisationState::Disabled {
                    self.search_address =
                        (self.search_address & 0xff_00ff) | ((data as u32) << 8);
                }
                None
            }
            0xb5 => {
                if self.initialisation_state != InitialisationState::Disabled {
                    self.search_address = (self.search_address & 0xff_ff00) | data as u32;
                }
                None
            }
            // PROGRAM SHORT ADDRESS, selected device only
            0xb7 => {
                if self.initialisation_state != InitialisationState::Disabled
                    && self.search_address == self.random_address
                {
                    if data == MASK {
                        self.short_address = MASK;
                    } else if data & 0x81 == 0x01 {
                        self.short_address = data >> 1;
                    }
                }
                None
            }
            // VERIFY SHORT ADDRESS
            0xb9 => {
                if self.initialisation_state != InitialisationState::Disabled
                    && data & 0x81 == 0x01
                    && self.short_address == data >> 1
                {
                    Some(0xff)
                } else {
                    None
                }
            }
            // QUERY SHORT ADDRESS, selected device only
            0xbb => {
                if self.initialisation_state != InitialisationState::Disabled
                    && self.search_address == self.random_address
                    && self.short_address != MASK
                {
                    Some((self.short_address << 1) | 1)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn status(&self) -> u8 {
        let mut status = 0;
        if self.actual_level > 0 {
            status |= 0x04;
        }
        if self.short_address == MASK {
            status |= 0x40;
        }
        status
    }

    /// True on the second identical frame within 100 ms; the detection
    /// then resets, so a third transmission starts a new pair.
    fn track_repeat(&mut self, frame: [u8; 2], now_us: u64) -> bool {
        let confirmed = matches!(
            self.last_frame,
            Some((last, at)) if last == frame && now_us - at < 100_000
        );
        self.last_frame = if confirmed { None } else { Some((frame, now_us)) };
        confirmed
    }
}

impl Default for SimGear {
    fn default() -> Self {
        Self::new()
    }
}
