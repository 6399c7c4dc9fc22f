//! The virtual bus line and the platform collaborators backed by it.
//!
//! The line is wired-AND: it is high only while the engine, every gear
//! and the test harness all release it. Time does not flow on its own;
//! [`super::net::SimNet`] advances `now_us` from event to event.

use crate::bus::phy::{BusClock, TickTimer};
use crate::timing::TE_US;
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use std::cell::RefCell;
use std::rc::Rc;

pub struct WireState {
    /// Engine transmit level (true = released).
    pub(crate) driver_level: bool,
    /// Bitmask of gear sources currently pulling the line low.
    pub(crate) gear_pulls: u32,
    /// Harness-injected pull (external master, faults).
    pub(crate) external_pull: bool,
    /// Virtual clock.
    pub(crate) now_us: u64,
    /// When the next half-bit tick fires; `TickTimer::restart` re-phases.
    pub(crate) next_tick_us: u64,
}

impl WireState {
    pub fn new() -> Rc<RefCell<WireState>> {
        Rc::new(RefCell::new(WireState {
            driver_level: true,
            gear_pulls: 0,
            external_pull: false,
            now_us: 0,
            next_tick_us: TE_US as u64,
        }))
    }

    /// Resolved bus level.
    pub fn resolved(&self) -> bool {
        self.driver_level && self.gear_pulls == 0 && !self.external_pull
    }
}

pub struct SimTxPin(pub Rc<RefCell<WireState>>);
pub struct SimRxPin(pub Rc<RefCell<WireState>>);
pub struct SimClock(pub Rc<RefCell<WireState>>);
pub struct SimTimer(pub Rc<RefCell<WireState>>);

impl ErrorType for SimTxPin {
    type Error = Infallible;
}

impl OutputPin for SimTxPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().driver_level = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().driver_level = true;
        Ok(())
    }
}

impl ErrorType for SimRxPin {
    type Error = Infallible;
}

impl InputPin for SimRxPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.borrow().resolved())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.borrow().resolved())
    }
}

impl BusClock for SimClock {
    fn micros(&mut self) -> u32 {
        self.0.borrow().now_us as u32
    }

    fn millis(&mut self) -> u32 {
        (self.0.borrow().now_us / 1000) as u32
    }
}

impl TickTimer for SimTimer {
    fn restart(&mut self) {
        let mut wire = self.0.borrow_mut();
        wire.next_tick_us = wire.now_us + TE_US as u64;
    }
}
