//! The line-level bus engine.
//!
//! [`DaliBus`] owns the complete transmit/receive state machine. It is
//! designed to live in a `static`: `DaliBus::new()` is const, and all
//! methods take `&self`, serializing on an internal critical section. The
//! application wires two interrupts into it:
//!
//! - a periodic timer firing every half-bit ([`crate::timing::TE_US`])
//!   calls [`DaliBus::tick`],
//! - an any-edge interrupt on the receive pin calls [`DaliBus::on_edge`].
//!
//! Exactly one transmission is in flight at a time; a `send_raw` while the
//! engine is not idle reports [`DaliSendResult::Busy`]. The reply to a
//! transmitted frame is read with [`DaliBus::last_response`]; forward
//! frames observed on the bus while idle are delivered through the receive
//! callback instead, keeping request/reply pairing intact.
//!
//! Callbacks run in interrupt context: they must be short, must not block
//! and must not call back into the engine.

pub mod phy;

mod engine;

use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::frame::DaliFrame;
use engine::BusCore;
use phy::{BusClock, Line, TickTimer};

/// Outcome of a transmission or of polling the response slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DaliSendResult {
    /// Frame accepted, transmission in progress.
    Sent,
    /// Backward frame received.
    Answer(u8),
    /// No backward frame within the reply window.
    Empty,
    /// The backward frame was corrupted on the wire.
    Framing,
    /// Unsupported bit count or buffer size.
    InvalidParameter,
    /// A transmission or reception is already in flight.
    Busy,
    /// The bus did not become idle before the deadline.
    ReadyTimeout,
    /// The transaction did not complete before the deadline.
    SendTimeout,
}

impl DaliSendResult {
    /// Accept outcomes of a command that expects no answer.
    pub fn check_send(self) -> Result<(), DaliSendResult> {
        match self {
            DaliSendResult::Sent | DaliSendResult::Empty => Ok(()),
            other => Err(other),
        }
    }

    /// Require an answer byte.
    pub fn check_answer(self) -> Result<u8, DaliSendResult> {
        match self {
            DaliSendResult::Answer(value) => Ok(value),
            other => Err(other),
        }
    }
}

/// Contents of the response slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DaliResponse {
    /// Complete backward frame.
    Answer(u8),
    /// Nothing received.
    Empty,
    /// Partial or corrupted backward frame.
    Error,
}

impl From<DaliResponse> for DaliSendResult {
    fn from(response: DaliResponse) -> DaliSendResult {
        match response {
            DaliResponse::Answer(value) => DaliSendResult::Answer(value),
            DaliResponse::Empty => DaliSendResult::Empty,
            DaliResponse::Error => DaliSendResult::Framing,
        }
    }
}

/// Wire-level faults detected in interrupt context and surfaced through
/// the error callback. The engine recovers on its own in every case.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DaliBusError {
    /// Sampled level contradicted the commanded level during transmission.
    Collision,
    /// The bus was held low for longer than two bit times outside of a
    /// transmission.
    Pulldown,
    /// An edge left the bus high while it was already expected high.
    CantBeHigh,
    /// A backward frame began with an invalid start bit.
    InvalidStartBit,
    /// An edge delta matched neither one nor two half-bits.
    Timing,
}

/// Unsolicited forward frame observed on the bus.
pub type ReceivedCallback = fn(DaliFrame);
/// Any edge on the receive pin.
pub type ActivityCallback = fn();
/// Wire-level fault.
pub type ErrorCallback = fn(DaliBusError);

/// The DALI bus engine. See the [module docs](self).
pub struct DaliBus<TX, RX, C, T> {
    core: Mutex<RefCell<Option<BusCore<TX, RX, C, T>>>>,
}

impl<TX, RX, C, T> DaliBus<TX, RX, C, T> {
    /// A dormant engine; nothing happens until [`DaliBus::begin`].
    pub const fn new() -> Self {
        DaliBus {
            core: Mutex::new(RefCell::new(None)),
        }
    }
}

impl<TX, RX, C, T> Default for DaliBus<TX, RX, C, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TX, RX, C, T> DaliBus<TX, RX, C, T>
where
    TX: OutputPin,
    RX: InputPin,
    C: BusClock,
    T: TickTimer,
{
    /// One-shot initialisation: take ownership of the pins, the clock and
    /// the tick timer, release the bus to its idle (high) level.
    ///
    /// With `active_low` (the common interface hardware) the GPIO sense is
    /// inverted: commanding the idle level drives the tx GPIO low.
    pub fn begin(&self, tx: TX, rx: RX, clock: C, timer: T, active_low: bool) {
        critical_section::with(|cs| {
            *self.core.borrow_ref_mut(cs) =
                Some(BusCore::new(Line::new(tx, rx, active_low), clock, timer));
        });
    }

    fn with<R>(&self, f: impl FnOnce(&mut BusCore<TX, RX, C, T>) -> R) -> Option<R> {
        critical_section::with(|cs| self.core.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// Queue a raw frame of `bits` ∈ {8, 16, 24, 25} for transmission.
    ///
    /// Returns [`DaliSendResult::Sent`] on success; the transmission then
    /// runs from the tick interrupt. A 25-bit frame is passed as three
    /// bytes with the trailing framing bit in the third byte's LSB.
    pub fn send_raw(&self, data: &[u8], bits: u8) -> DaliSendResult {
        self.with(|core| core.send_raw(data, bits))
            .unwrap_or(DaliSendResult::InvalidParameter)
    }

    /// Queue a typed frame for transmission.
    pub fn send_frame(&self, frame: DaliFrame) -> DaliSendResult {
        self.with(|core| core.send_frame(frame))
            .unwrap_or(DaliSendResult::InvalidParameter)
    }

    /// Read and consume the response slot: `Answer` for a complete
    /// backward frame, `Empty` when nothing was received, `Error` for a
    /// partial or corrupted one. After any call the slot reads `Empty`
    /// until a new backward frame arrives.
    pub fn last_response(&self) -> DaliResponse {
        self.with(|core| core.last_response())
            .unwrap_or(DaliResponse::Empty)
    }

    /// True when no transmission or reception is in flight.
    pub fn is_idle(&self) -> bool {
        self.with(|core| core.is_idle()).unwrap_or(false)
    }

    /// Half-bit ticks since the last observed edge, saturating at 255.
    pub fn idle_ticks(&self) -> u8 {
        self.with(|core| core.idle_ticks()).unwrap_or(0)
    }

    /// Millisecond clock of the injected time source.
    pub fn millis(&self) -> u32 {
        self.with(|core| core.millis()).unwrap_or(0)
    }

    /// Disable or re-enable collision checking during transmission.
    pub fn set_collision_check(&self, enabled: bool) {
        self.with(|core| core.set_collision_check(enabled));
    }

    /// Install the handler for observed forward frames. It fires only for
    /// frames that are not the reply to our own transmission.
    pub fn set_received_callback(&self, callback: Option<ReceivedCallback>) {
        self.with(|core| core.received_cb = callback);
    }

    /// Install the bus activity handler (every edge).
    pub fn set_activity_callback(&self, callback: Option<ActivityCallback>) {
        self.with(|core| core.activity_cb = callback);
    }

    /// Install the wire fault handler.
    pub fn set_error_callback(&self, callback: Option<ErrorCallback>) {
        self.with(|core| core.error_cb = callback);
    }

    /// Half-bit timer interrupt entry point. Must be invoked every
    /// [`crate::timing::TE_US`] microseconds once `begin` has run.
    pub fn tick(&self) {
        self.with(|core| core.tick());
    }

    /// Edge interrupt entry point for the receive pin (both edges).
    pub fn on_edge(&self) {
        self.with(|core| core.on_edge());
    }
}
