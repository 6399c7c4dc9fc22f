//! Platform collaborators for the bus engine.
//!
//! The engine needs a pin pair, a monotonic clock and control over the
//! phase of the half-bit tick timer. All three are injected at
//! [`DaliBus::begin`](super::DaliBus::begin); the application remains
//! responsible for routing its timer and edge interrupts into
//! [`DaliBus::tick`](super::DaliBus::tick) and
//! [`DaliBus::on_edge`](super::DaliBus::on_edge).

use embedded_hal::digital::{InputPin, OutputPin};

/// Monotonic, wrapping time source.
pub trait BusClock {
    /// Microseconds since some epoch. Wraps; only deltas are used.
    fn micros(&mut self) -> u32;
    /// Milliseconds since some epoch. Wraps; only deltas are used.
    fn millis(&mut self) -> u32;
}

/// Handle on the periodic half-bit timer.
///
/// The timer must invoke [`DaliBus::tick`](super::DaliBus::tick) every
/// [`TE_US`](crate::timing::TE_US) microseconds. `restart` re-phases it so
/// the next tick fires one full period from now.
pub trait TickTimer {
    fn restart(&mut self);
}

/// The bus line: a transmit pin pulling the bus low and a receive pin
/// sampling it.
///
/// Levels are logical: `true` is the idle (high) bus, `false` is the bus
/// pulled down. With `active_low` the GPIO sense is inverted on both pins,
/// which matches most DALI interface hardware (driving the tx GPIO high
/// pulls the bus low).
pub struct Line<TX, RX> {
    tx: TX,
    rx: RX,
    active_low: bool,
    commanded: bool,
}

impl<TX: OutputPin, RX: InputPin> Line<TX, RX> {
    /// Wrap the pin pair and release the bus (logical high).
    pub fn new(tx: TX, rx: RX, active_low: bool) -> Line<TX, RX> {
        let mut line = Line {
            tx,
            rx,
            active_low,
            commanded: true,
        };
        line.set(true);
        line
    }

    /// Drive the bus and record the commanded level for collision checks.
    pub fn set(&mut self, level: bool) {
        if level != self.active_low {
            let _ = self.tx.set_high();
        } else {
            let _ = self.tx.set_low();
        }
        self.commanded = level;
    }

    /// Sample the logical bus level. A failed read counts as idle.
    pub fn get(&mut self) -> bool {
        self.rx.is_high().unwrap_or(!self.active_low) != self.active_low
    }

    /// Level the driver last commanded.
    pub fn commanded(&self) -> bool {
        self.commanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::wire::{SimRxPin, SimTxPin, WireState};

    #[test]
    fn active_low_inverts_both_directions() {
        let wire = WireState::new();
        let mut line = Line::new(
            SimTxPin(wire.clone()),
            SimRxPin(wire.clone()),
            true,
        );
        // Logical high drives the GPIO low.
        line.set(true);
        assert!(!wire.borrow().driver_level);
        assert!(line.get());
        line.set(false);
        assert!(wire.borrow().driver_level);
        assert!(!line.get());
        assert!(!line.commanded());
    }

    #[test]
    fn active_high_passes_through() {
        let wire = WireState::new();
        let mut line = Line::new(
            SimTxPin(wire.clone()),
            SimRxPin(wire.clone()),
            false,
        );
        line.set(false);
        assert!(!wire.borrow().driver_level);
        assert!(!line.get());
        line.set(true);
        assert!(wire.borrow().driver_level);
        assert!(line.get());
    }
}
