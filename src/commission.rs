//! Short address assignment.
//!
//! Discovery works by binary search: every initialised device holds a
//! 24-bit random address, and COMPARE asks "is your random address less
//! than or equal to the search address?". Lowering the search address one
//! bit per round isolates the device with the smallest random, which is
//! then programmed, verified and withdrawn from the search, until COMPARE
//! at the top of the range stays silent.
//!
//! The whole procedure is cooperative: [`Commissioner::tick`] performs at
//! most one bus operation per call and returns immediately while the bus
//! is busy. Call it from the main loop until [`Commissioner::is_done`].

use crate::bus::phy::{BusClock, TickTimer};
use crate::bus::DaliResponse;
use crate::common::address::{Address, Short};
use crate::controller::DaliController;
use crate::gear::cmd_defs as cmd;
use crate::timing;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, warn};

/// States of the commissioning procedure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommissionState {
    Off,
    Init,
    Init2,
    WriteDtr,
    RemoveShort,
    RemoveShort2,
    Random,
    Random2,
    RandomWait,
    StartSearch,
    SearchHigh,
    SearchMid,
    SearchLow,
    Compare,
    CheckFound,
    ProgramShort,
    VerifyShort,
    VerifyShortResponse,
    Withdraw,
    Terminate,
}

/// Outcome of one binary-search round.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SearchStep {
    /// All 24 bits resolved; the search address selects one device.
    Found,
    /// Continue with a new search address.
    Narrow(u32),
    /// No device responded at all, or the search ran out of rounds.
    Done,
}

/// One binary-search decision, from the COMPARE outcome of the current
/// round. `found` is true when at least one device has a random address
/// at or below `search_address` (any non-empty reply, including a
/// collision of several YES frames).
fn search_step(found: bool, iterations: u8, search_address: u32) -> SearchStep {
    if found {
        if iterations >= 24 {
            SearchStep::Found
        } else {
            SearchStep::Narrow(search_address.wrapping_sub(0x0080_0000 >> iterations))
        }
    } else if iterations == 0 || iterations > 24 {
        SearchStep::Done
    } else if iterations == 24 {
        // The previous round overshot by one; the device must see its
        // exact address before PROGRAM SHORT ADDRESS can select it.
        SearchStep::Narrow(search_address.wrapping_add(1))
    } else {
        SearchStep::Narrow(search_address.wrapping_add(0x0080_0000 >> iterations))
    }
}

/// Driver of the commissioning procedure.
pub struct Commissioner {
    state: CommissionState,
    start_address: u8,
    next_short_address: u8,
    only_new: bool,
    iterations: u8,
    search_address: u32,
}

impl Commissioner {
    pub fn new() -> Commissioner {
        Commissioner {
            state: CommissionState::Off,
            start_address: 0,
            next_short_address: 0,
            only_new: false,
            iterations: 0,
            search_address: 0xff_ffff,
        }
    }

    /// Begin commissioning. Addresses are assigned upwards from
    /// `start_address`. With `only_new`, devices that already hold a
    /// short address keep it and stay out of the search; otherwise all
    /// short addresses are cleared first.
    pub fn start(&mut self, start_address: u8, only_new: bool) {
        debug!(
            "commissioning from address {}, only_new={}",
            start_address, only_new
        );
        self.start_address = start_address;
        self.next_short_address = start_address;
        self.only_new = only_new;
        self.state = CommissionState::Init;
    }

    pub fn state(&self) -> CommissionState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == CommissionState::Off
    }

    /// Next address to program; once done, one past the last assigned.
    pub fn next_short_address(&self) -> u8 {
        self.next_short_address
    }

    /// Devices programmed so far.
    pub fn devices_found(&self) -> u8 {
        self.next_short_address - self.start_address
    }

    /// Advance the procedure by at most one bus operation. No-op while
    /// the bus is busy or commissioning is off.
    pub fn tick<TX, RX, C, T>(&mut self, ctl: &DaliController<TX, RX, C, T>)
    where
        TX: OutputPin,
        RX: InputPin,
        C: BusClock,
        T: TickTimer,
    {
        if !ctl.bus().is_idle() {
            return;
        }
        match self.state {
            CommissionState::Off => {}
            CommissionState::Init => {
                self.send_initialise(ctl);
                self.state = CommissionState::Init2;
            }
            CommissionState::Init2 => {
                self.send_initialise(ctl);
                self.state = if self.only_new {
                    CommissionState::Random
                } else {
                    CommissionState::WriteDtr
                };
            }
            CommissionState::WriteDtr => {
                ctl.send(cmd::DTR0(0xff));
                self.state = CommissionState::RemoveShort;
            }
            CommissionState::RemoveShort => {
                ctl.send(cmd::SET_SHORT_ADDRESS(Address::Broadcast));
                self.state = CommissionState::RemoveShort2;
            }
            CommissionState::RemoveShort2 => {
                ctl.send(cmd::SET_SHORT_ADDRESS(Address::Broadcast));
                self.state = CommissionState::Random;
            }
            CommissionState::Random => {
                ctl.send(cmd::RANDOMISE());
                self.state = CommissionState::Random2;
            }
            CommissionState::Random2 => {
                ctl.send(cmd::RANDOMISE());
                self.state = CommissionState::RandomWait;
            }
            CommissionState::RandomWait => {
                // Give the gear at least 100 ms to roll its randoms.
                if ctl.bus().idle_ticks() >= timing::RANDOMISE_SETTLE_TICKS {
                    self.state = CommissionState::StartSearch;
                }
            }
            CommissionState::StartSearch => {
                self.iterations = 0;
                self.search_address = 0xff_ffff;
                // Same tick: the first SEARCHADDRH goes out immediately.
                self.send_search_high(ctl);
            }
            CommissionState::SearchHigh => {
                self.send_search_high(ctl);
            }
            CommissionState::SearchMid => {
                ctl.send(cmd::SEARCHADDRM((self.search_address >> 8) as u8));
                self.state = CommissionState::SearchLow;
            }
            CommissionState::SearchLow => {
                ctl.send(cmd::SEARCHADDRL(self.search_address as u8));
                self.state = CommissionState::Compare;
            }
            CommissionState::Compare => {
                ctl.send(cmd::COMPARE());
                self.state = CommissionState::CheckFound;
            }
            CommissionState::CheckFound => {
                let found = ctl.bus().last_response() != DaliResponse::Empty;
                match search_step(found, self.iterations, self.search_address) {
                    SearchStep::Found => {
                        if self.next_short_address > 63 {
                            warn!("short address space exhausted");
                            self.state = CommissionState::Terminate;
                        } else {
                            debug!("device isolated at {:06x}", self.search_address);
                            self.state = CommissionState::ProgramShort;
                        }
                    }
                    SearchStep::Narrow(addr) => {
                        self.search_address = addr;
                        self.state = CommissionState::SearchHigh;
                    }
                    SearchStep::Done => {
                        self.state = CommissionState::Terminate;
                    }
                }
                self.iterations += 1;
            }
            CommissionState::ProgramShort => {
                ctl.send(cmd::PROGRAM_SHORT_ADDRESS(Short::new(
                    self.next_short_address,
                )));
                self.state = CommissionState::VerifyShort;
            }
            CommissionState::VerifyShort => {
                ctl.send(cmd::VERIFY_SHORT_ADDRESS(Short::new(
                    self.next_short_address,
                )));
                self.state = CommissionState::VerifyShortResponse;
            }
            CommissionState::VerifyShortResponse => {
                if ctl.bus().last_response() == DaliResponse::Answer(0xff) {
                    debug!("programmed short address {}", self.next_short_address);
                    self.next_short_address += 1;
                    self.state = CommissionState::Withdraw;
                } else {
                    warn!("short address verify failed");
                    self.state = CommissionState::Terminate;
                }
            }
            CommissionState::Withdraw => {
                ctl.send(cmd::WITHDRAW());
                self.state = CommissionState::StartSearch;
            }
            CommissionState::Terminate => {
                ctl.send(cmd::TERMINATE());
                debug!(
                    "commissioning finished, {} devices",
                    self.devices_found()
                );
                self.state = CommissionState::Off;
            }
        }
    }

    fn send_initialise<TX, RX, C, T>(&self, ctl: &DaliController<TX, RX, C, T>)
    where
        TX: OutputPin,
        RX: InputPin,
        C: BusClock,
        T: TickTimer,
    {
        if self.only_new {
            ctl.send(cmd::INITIALISE_NO_ADDR());
        } else {
            ctl.send(cmd::INITIALISE_ALL());
        }
    }

    fn send_search_high<TX, RX, C, T>(&mut self, ctl: &DaliController<TX, RX, C, T>)
    where
        TX: OutputPin,
        RX: InputPin,
        C: BusClock,
        T: TickTimer,
    {
        ctl.send(cmd::SEARCHADDRH((self.search_address >> 16) as u8));
        self.state = CommissionState::SearchMid;
    }
}

impl Default for Commissioner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_step_decisions() {
        // Narrowing clears the probed bit.
        assert_eq!(
            search_step(true, 0, 0xff_ffff),
            SearchStep::Narrow(0x7f_ffff)
        );
        assert_eq!(
            search_step(true, 1, 0x7f_ffff),
            SearchStep::Narrow(0x3f_ffff)
        );
        // 24 resolved bits select a device.
        assert_eq!(search_step(true, 24, 0x3a7f10), SearchStep::Found);
        // Silence on the first round: nothing on the bus.
        assert_eq!(search_step(false, 0, 0xff_ffff), SearchStep::Done);
        // Silence mid-search restores the probed bit.
        assert_eq!(
            search_step(false, 5, 0x40_0000),
            SearchStep::Narrow(0x40_0000 + (0x80_0000 >> 5))
        );
        // Silence at round 24: the address overshot by exactly one.
        assert_eq!(search_step(false, 24, 0x3a7f0f), SearchStep::Narrow(0x3a7f10));
        assert_eq!(search_step(false, 25, 0), SearchStep::Done);
    }

    /// The decision function drives a model of the bus to the smallest
    /// random address in at most 25 rounds.
    #[test]
    fn search_converges_to_smallest_random() {
        let randoms = [0x3a7f10u32, 0xc10000];
        let mut search = 0xff_ffffu32;
        let mut iterations = 0u8;
        loop {
            let found = randoms.iter().any(|r| *r <= search);
            match search_step(found, iterations, search) {
                SearchStep::Found => break,
                SearchStep::Narrow(addr) => search = addr,
                SearchStep::Done => panic!("search gave up"),
            }
            iterations += 1;
            assert!(iterations <= 25, "search did not converge");
        }
        assert_eq!(search, 0x3a7f10);
    }

    #[test]
    fn single_device_converges() {
        let random = 0u32;
        let mut search = 0xff_ffffu32;
        let mut iterations = 0u8;
        loop {
            let found = random <= search;
            match search_step(found, iterations, search) {
                SearchStep::Found => break,
                SearchStep::Narrow(addr) => search = addr,
                SearchStep::Done => panic!("search gave up"),
            }
            iterations += 1;
            assert!(iterations <= 25);
        }
        assert_eq!(search, 0);
    }
}
