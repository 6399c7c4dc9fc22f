//! The bus state machine.
//!
//! One [`BusCore`] holds everything both interrupt contexts touch. The
//! half-bit tick drives transmission and all timeout transitions; the edge
//! interrupt performs collision checking during transmission and Manchester
//! decoding during reception. The owning [`DaliBus`](super::DaliBus)
//! serializes access with a critical section, so the methods here can
//! assume exclusive access.

use super::phy::{BusClock, Line, TickTimer};
use super::{
    ActivityCallback, DaliBusError, DaliResponse, DaliSendResult, ErrorCallback, ReceivedCallback,
};
use crate::frame::DaliFrame;
use crate::timing;
use embedded_hal::digital::{InputPin, OutputPin};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum BusState {
    TxStart1st,
    TxStart2nd,
    TxBit1st,
    TxBit2nd,
    TxStop1st,
    TxStop,
    Idle,
    Short,
    WaitRx,
    RxStart,
    RxBit,
    RxStop,
}

impl BusState {
    fn is_transmitting(self) -> bool {
        matches!(
            self,
            BusState::TxStart1st
                | BusState::TxStart2nd
                | BusState::TxBit1st
                | BusState::TxBit2nd
                | BusState::TxStop1st
                | BusState::TxStop
        )
    }
}

pub(super) struct BusCore<TX, RX, C, T> {
    line: Line<TX, RX>,
    clock: C,
    timer: T,
    pub(super) state: BusState,
    tx_message: [u8; 4],
    tx_bits: u8,
    tx_pos: u8,
    tx_collision: bool,
    collision_check: bool,
    rx_word: u16,
    pub(super) rx_half_bits: u8,
    rx_error: bool,
    rx_is_response: bool,
    rx_long: u32,
    rx_last_edge_us: u32,
    idle_ticks: u8,
    pub(super) received_cb: Option<ReceivedCallback>,
    pub(super) activity_cb: Option<ActivityCallback>,
    pub(super) error_cb: Option<ErrorCallback>,
}

impl<TX, RX, C, T> BusCore<TX, RX, C, T>
where
    TX: OutputPin,
    RX: InputPin,
    C: BusClock,
    T: TickTimer,
{
    pub(super) fn new(line: Line<TX, RX>, mut clock: C, timer: T) -> Self {
        let now = clock.micros();
        BusCore {
            line,
            clock,
            timer,
            state: BusState::Idle,
            tx_message: [0; 4],
            tx_bits: 0,
            tx_pos: 0,
            tx_collision: false,
            collision_check: true,
            rx_word: 0,
            rx_half_bits: 0,
            rx_error: false,
            rx_is_response: false,
            rx_long: 0,
            rx_last_edge_us: now,
            idle_ticks: 0,
            received_cb: None,
            activity_cb: None,
            error_cb: None,
        }
    }

    pub(super) fn millis(&mut self) -> u32 {
        self.clock.millis()
    }

    pub(super) fn is_idle(&self) -> bool {
        self.state == BusState::Idle
    }

    pub(super) fn idle_ticks(&self) -> u8 {
        self.idle_ticks
    }

    pub(super) fn set_collision_check(&mut self, enabled: bool) {
        self.collision_check = enabled;
    }

    fn report(&self, error: DaliBusError) {
        if let Some(cb) = self.error_cb {
            cb(error);
        }
    }

    /// Validate and buffer a raw frame, then arm the transmitter.
    ///
    /// For 25-bit frames the third byte's LSB is the trailing framing bit;
    /// it moves to the MSB of the synthesized fourth byte and the third
    /// byte's MSB is forced to 1 on the wire.
    pub(super) fn send_raw(&mut self, data: &[u8], bits: u8) -> DaliSendResult {
        let bytes = match bits {
            8 => 1,
            16 => 2,
            24 | 25 => 3,
            _ => return DaliSendResult::InvalidParameter,
        };
        if data.len() < bytes || data.len() > 3 {
            return DaliSendResult::InvalidParameter;
        }
        let mut message = [0u8; 4];
        message[..bytes].copy_from_slice(&data[..bytes]);
        if bits == 25 {
            message[3] = (message[2] & 0x01) << 7;
            message[2] |= 0x80;
        }
        self.arm(message, bits)
    }

    /// Buffer a typed frame. `Frame25` is taken as-is: 24 payload bits
    /// plus the trailing bit in byte 3 MSB.
    pub(super) fn send_frame(&mut self, frame: DaliFrame) -> DaliSendResult {
        let (message, bits) = frame.wire_image();
        self.arm(message, bits)
    }

    fn arm(&mut self, message: [u8; 4], bits: u8) -> DaliSendResult {
        if self.state != BusState::Idle {
            return DaliSendResult::Busy;
        }
        self.tx_message = message;
        self.tx_bits = bits;
        self.tx_collision = false;
        self.rx_word = 0;
        self.rx_half_bits = 0;
        self.rx_error = false;
        self.state = BusState::TxStart1st;
        DaliSendResult::Sent
    }

    /// Take the response slot. Consumes it: the next call reports `Empty`
    /// until a new backward frame arrives.
    pub(super) fn last_response(&mut self) -> DaliResponse {
        let response = if self.rx_error {
            DaliResponse::Error
        } else {
            match self.rx_half_bits {
                16 => DaliResponse::Answer((self.rx_word & 0xff) as u8),
                0 => DaliResponse::Empty,
                _ => DaliResponse::Error,
            }
        };
        self.rx_half_bits = 0;
        self.rx_error = false;
        response
    }

    fn tx_bit(&self, pos: u8) -> bool {
        self.tx_message[(pos >> 3) as usize] & (0x80 >> (pos & 0x07)) != 0
    }

    /// Half-bit timer interrupt body.
    pub(super) fn tick(&mut self) {
        if self.idle_ticks < u8::MAX {
            self.idle_ticks += 1;
        }

        // Something is holding the bus down for too long.
        if self.idle_ticks == timing::PULLDOWN_TICKS
            && !self.line.get()
            && self.state != BusState::Short
        {
            self.state = BusState::Short;
            self.line.set(true);
            self.report(DaliBusError::Pulldown);
        }

        match self.state {
            BusState::TxStart1st => {
                if self.idle_ticks >= timing::SETTLE_TICKS {
                    self.line.set(false);
                    self.state = BusState::TxStart2nd;
                }
            }
            BusState::TxStart2nd => {
                self.line.set(true);
                self.tx_pos = 0;
                self.state = BusState::TxBit1st;
            }
            BusState::TxBit1st => {
                self.line.set(!self.tx_bit(self.tx_pos));
                self.state = BusState::TxBit2nd;
            }
            BusState::TxBit2nd => {
                self.line.set(self.tx_bit(self.tx_pos));
                self.tx_pos += 1;
                self.state = if self.tx_pos < self.tx_bits {
                    BusState::TxBit1st
                } else {
                    BusState::TxStop1st
                };
            }
            BusState::TxStop1st => {
                self.line.set(true);
                self.state = BusState::TxStop;
            }
            BusState::TxStop => {
                if self.idle_ticks >= timing::STOP_TICKS {
                    self.state = BusState::WaitRx;
                    self.idle_ticks = 0;
                }
            }
            BusState::WaitRx => {
                if self.idle_ticks > timing::REPLY_WINDOW_TICKS {
                    // Reply timed out; the response slot stays empty.
                    self.state = BusState::Idle;
                }
            }
            BusState::RxStop => {
                if self.idle_ticks > timing::RX_STOP_TICKS {
                    self.state = BusState::Idle;
                }
            }
            BusState::RxStart | BusState::RxBit => {
                if self.idle_ticks > timing::RX_ABORT_TICKS {
                    self.state = BusState::Idle;
                    if !self.rx_is_response {
                        self.deliver_observed();
                        self.rx_half_bits = 0;
                        self.rx_error = false;
                    }
                }
            }
            BusState::Idle | BusState::Short => {}
        }
    }

    /// An observed forward frame ended (bus quiet). Hand it to the
    /// receive callback if it decodes to a known length.
    fn deliver_observed(&mut self) {
        if self.rx_error || self.rx_half_bits <= 16 {
            return;
        }
        let frame = match self.rx_half_bits / 2 {
            16 => DaliFrame::Frame16([(self.rx_long >> 8) as u8, self.rx_long as u8]),
            24 => DaliFrame::Frame24([
                (self.rx_long >> 16) as u8,
                (self.rx_long >> 8) as u8,
                self.rx_long as u8,
            ]),
            25 => DaliFrame::Frame25([
                (self.rx_long >> 17) as u8,
                (self.rx_long >> 9) as u8,
                (self.rx_long >> 1) as u8,
                ((self.rx_long & 1) as u8) << 7,
            ]),
            _ => {
                self.report(DaliBusError::Timing);
                return;
            }
        };
        if let Some(cb) = self.received_cb {
            cb(frame);
        }
    }

    /// Edge interrupt body.
    pub(super) fn on_edge(&mut self) {
        let level = self.line.get();
        self.idle_ticks = 0;
        if let Some(cb) = self.activity_cb {
            cb();
        }

        if self.state.is_transmitting() {
            // Our own edges come back through the receive pin; a level
            // that differs from the commanded one is someone else driving.
            if self.collision_check && level != self.line.commanded() {
                self.tx_collision = true;
                self.state = BusState::Idle;
                self.timer.restart();
                self.report(DaliBusError::Collision);
            }
            return;
        }

        let now = self.clock.micros();
        let delta = now.wrapping_sub(self.rx_last_edge_us);
        self.rx_last_edge_us = now;

        match self.state {
            BusState::WaitRx => {
                if !level {
                    // Start of the backward frame; re-phase the tick so a
                    // partial half-bit does not carry over.
                    self.timer.restart();
                    self.state = BusState::RxStart;
                    self.rx_is_response = true;
                } else {
                    // The bus is already high while idle, this cannot happen.
                    self.state = BusState::Idle;
                    self.report(DaliBusError::CantBeHigh);
                }
            }
            BusState::Idle => {
                if !level {
                    // Another master is transmitting; observe the frame.
                    self.state = BusState::RxStart;
                    self.rx_is_response = false;
                }
            }
            BusState::RxStart => {
                if level && timing::is_delta_within_te(delta) {
                    self.rx_word = 0;
                    self.rx_long = 0;
                    self.rx_half_bits = 0;
                    self.rx_error = false;
                    self.state = BusState::RxBit;
                } else {
                    self.rx_error = true;
                    self.state = BusState::RxStop;
                    self.report(DaliBusError::InvalidStartBit);
                }
            }
            BusState::RxBit => {
                if timing::is_delta_within_te(delta) {
                    // Mid-bit edges land on odd half-bit counts.
                    if self.rx_half_bits % 2 == 1 {
                        self.shift_in(level);
                    }
                    self.rx_half_bits = self.rx_half_bits.saturating_add(1);
                } else if timing::is_delta_within_2te(delta) {
                    self.shift_in(level);
                    self.rx_half_bits = self.rx_half_bits.saturating_add(2);
                } else {
                    self.rx_error = true;
                    self.state = BusState::RxStop;
                    self.report(DaliBusError::Timing);
                    return;
                }
                if self.rx_is_response && self.rx_half_bits == 16 {
                    self.state = BusState::RxStop;
                }
            }
            BusState::Short => {
                if level {
                    self.state = BusState::Idle;
                }
            }
            // Stop-bit edges carry no data.
            BusState::RxStop => {}
            _ => {}
        }
    }

    fn shift_in(&mut self, level: bool) {
        if self.rx_is_response {
            self.rx_word = (self.rx_word << 1) | level as u16;
        } else {
            self.rx_long = (self.rx_long << 1) | level as u32;
        }
    }

    #[cfg(test)]
    pub(super) fn tx_image(&self) -> ([u8; 4], u8) {
        (self.tx_message, self.tx_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::wire::{SimClock, SimRxPin, SimTimer, SimTxPin, WireState};
    use crate::timing::TE_US;
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestCore = BusCore<SimTxPin, SimRxPin, SimClock, SimTimer>;

    struct Rig {
        wire: Rc<RefCell<WireState>>,
        core: TestCore,
        last_level: bool,
    }

    impl Rig {
        fn new() -> Rig {
            let wire = WireState::new();
            let core = BusCore::new(
                Line::new(SimTxPin(wire.clone()), SimRxPin(wire.clone()), false),
                SimClock(wire.clone()),
                SimTimer(wire.clone()),
            );
            Rig {
                wire,
                core,
                last_level: true,
            }
        }

        fn level(&self) -> bool {
            self.wire.borrow().resolved()
        }

        /// Fire the edge interrupt if the resolved level changed.
        fn sync_edge(&mut self) {
            let level = self.level();
            if level != self.last_level {
                self.last_level = level;
                self.core.on_edge();
            }
        }

        /// One timer period: advance time, run the tick, deliver any edge
        /// the tick produced.
        fn tick(&mut self) {
            {
                let mut w = self.wire.borrow_mut();
                w.now_us += TE_US as u64;
            }
            self.core.tick();
            self.sync_edge();
        }

        /// Externally force or release the bus at a given absolute time.
        fn external(&mut self, at_us: u64, pull: bool) {
            {
                let mut w = self.wire.borrow_mut();
                w.now_us = at_us;
                w.external_pull = pull;
            }
            self.sync_edge();
        }

        fn now(&self) -> u64 {
            self.wire.borrow().now_us
        }

        /// Run a full transmission and return the tick counts at the first
        /// low edge and at the transition into WaitRx.
        fn transmit(&mut self, data: &[u8], bits: u8) -> (u32, u32) {
            assert_eq!(self.core.send_raw(data, bits), DaliSendResult::Sent);
            let mut first_low = None;
            let mut ticks = 0u32;
            loop {
                self.tick();
                ticks += 1;
                if first_low.is_none() && !self.level() {
                    first_low = Some(ticks);
                }
                if self.core.state == BusState::WaitRx {
                    return (first_low.expect("no start bit seen"), ticks);
                }
                assert!(ticks < 200, "transmit never reached WaitRx");
            }
        }
    }

    #[test]
    fn tick_count_per_frame() {
        // From the first low half-bit of the start bit to WaitRx takes
        // exactly 2 * (bits + 3) ticks for a frame ending in 0.
        let mut rig = Rig::new();
        let (first_low, wait_rx) = rig.transmit(&[0xfe, 0x00], 16);
        assert_eq!(wait_rx - first_low, 2 * (16 + 3));

        // 8-bit frame, also ending in a 0 bit.
        let mut rig = Rig::new();
        let (first_low, wait_rx) = rig.transmit(&[0x10], 8);
        assert_eq!(wait_rx - first_low, 2 * (8 + 3));
    }

    #[test]
    fn settle_time_before_start() {
        let mut rig = Rig::new();
        assert_eq!(rig.core.send_raw(&[0xfe, 0x00], 16), DaliSendResult::Sent);
        // No falling edge before 26 quiet ticks.
        for _ in 0..25 {
            rig.tick();
            assert!(rig.level());
        }
        rig.tick();
        assert!(!rig.level());
    }

    #[test]
    fn invalid_bit_counts_rejected() {
        let mut rig = Rig::new();
        for bits in [0u8, 1, 7, 9, 17, 26, 32] {
            assert_eq!(
                rig.core.send_raw(&[0xff, 0xff, 0xff], bits),
                DaliSendResult::InvalidParameter,
                "bit count {} must be rejected",
                bits
            );
        }
        assert_eq!(
            rig.core.send_raw(&[0, 0, 0, 0], 16),
            DaliSendResult::InvalidParameter
        );
        // Short buffers are rejected too.
        assert_eq!(rig.core.send_raw(&[0x00], 16), DaliSendResult::InvalidParameter);
        assert_eq!(rig.core.send_raw(&[0xff, 0xff, 0xff], 24), DaliSendResult::Sent);
    }

    #[test]
    fn busy_while_not_idle_leaves_tx_untouched() {
        let mut rig = Rig::new();
        assert_eq!(rig.core.send_raw(&[0x12, 0x34], 16), DaliSendResult::Sent);
        let image = rig.core.tx_image();
        assert_eq!(rig.core.send_raw(&[0xff, 0xff], 16), DaliSendResult::Busy);
        assert_eq!(rig.core.tx_image(), image);
    }

    #[test]
    fn frame25_synthesis_and_passthrough() {
        let mut rig = Rig::new();
        assert_eq!(rig.core.send_raw(&[0x12, 0x34, 0x57], 25), DaliSendResult::Sent);
        // LSB of the third byte moves to the synthesized fourth byte, the
        // third byte's MSB is forced high.
        assert_eq!(rig.core.tx_image(), ([0x12, 0x34, 0xd7, 0x80], 25));

        let mut rig = Rig::new();
        assert_eq!(
            rig.core.send_frame(DaliFrame::Frame25([0x12, 0x34, 0x56, 0x80])),
            DaliSendResult::Sent
        );
        assert_eq!(rig.core.tx_image(), ([0x12, 0x34, 0x56, 0x80], 25));
    }

    /// Feed a backward frame as ideal edges once the engine waits for it.
    fn feed_backward(rig: &mut Rig, value: u8) {
        while rig.core.state != BusState::WaitRx {
            rig.tick();
        }
        // Half-bit level sequence: start bit (1) then data bits MSB first.
        let mut halves = vec![false, true];
        for i in (0..8).rev() {
            let bit = value & (1 << i) != 0;
            halves.push(!bit);
            halves.push(bit);
        }
        let t0 = rig.now() + 4000;
        let mut level = true;
        for (i, half) in halves.iter().enumerate() {
            if *half != level {
                level = *half;
                rig.external(t0 + i as u64 * TE_US as u64, !level);
            }
        }
        // Release after the last half-bit.
        if !level {
            rig.external(t0 + halves.len() as u64 * TE_US as u64, false);
        }
    }

    #[test]
    fn backward_frame_decodes_and_slot_consumes() {
        let mut rig = Rig::new();
        rig.transmit(&[0x07, 0xa0], 16);
        feed_backward(&mut rig, 0x80);
        assert_eq!(rig.core.last_response(), DaliResponse::Answer(0x80));
        // The slot is consumed.
        assert_eq!(rig.core.last_response(), DaliResponse::Empty);
        // The engine settles back to idle after the stop phase.
        for _ in 0..8 {
            rig.tick();
        }
        assert_eq!(rig.core.state, BusState::Idle);
    }

    #[test]
    fn no_reply_times_out_empty() {
        let mut rig = Rig::new();
        rig.transmit(&[0xfe, 0x00], 16);
        for _ in 0..24 {
            rig.tick();
        }
        assert_eq!(rig.core.state, BusState::Idle);
        assert_eq!(rig.core.last_response(), DaliResponse::Empty);
    }

    #[test]
    fn double_te_advances_two_half_bits() {
        let mut rig = Rig::new();
        rig.transmit(&[0x07, 0xa0], 16);
        // Start of reply: falling edge, then a valid start bit.
        let t0 = rig.now() + 4000;
        rig.external(t0, true);
        rig.external(t0 + 417, false);
        assert_eq!(rig.core.state, BusState::RxBit);
        assert_eq!(rig.core.rx_half_bits, 0);
        // A two half-bit delta shifts one bit and counts two halves.
        rig.external(t0 + 417 + 834, true);
        assert_eq!(rig.core.rx_half_bits, 2);
        // A one half-bit delta on an even count shifts nothing.
        rig.external(t0 + 417 + 834 + 417, false);
        assert_eq!(rig.core.rx_half_bits, 3);
    }

    #[test]
    fn bad_delta_is_a_framing_error() {
        let mut rig = Rig::new();
        rig.transmit(&[0x07, 0xa0], 16);
        let t0 = rig.now() + 4000;
        rig.external(t0, true);
        rig.external(t0 + 417, false);
        // 600 us is in neither acceptance window.
        rig.external(t0 + 417 + 600, true);
        assert_eq!(rig.core.state, BusState::RxStop);
        assert_eq!(rig.core.last_response(), DaliResponse::Error);
    }

    #[test]
    fn collision_aborts_and_recovers() {
        let mut rig = Rig::new();
        assert_eq!(rig.core.send_raw(&[0xfe, 0xfe], 16), DaliSendResult::Sent);
        // Let the start bit and a few data bits go out.
        for _ in 0..(26 + 9) {
            rig.tick();
        }
        assert!(rig.core.state.is_transmitting());
        // Step to a half-bit where the driver commands a high line, then
        // force the line low against it.
        while !rig.core.line.commanded() {
            rig.tick();
        }
        let t = rig.now() + 100;
        rig.external(t, true);
        assert_eq!(rig.core.state, BusState::Idle);
        assert!(rig.core.tx_collision);
        rig.external(t + 200, false);
        // A fresh transmission is accepted afterwards.
        assert_eq!(rig.core.send_raw(&[0x00, 0x00], 16), DaliSendResult::Sent);
    }

    #[test]
    fn stuck_low_line_reports_pulldown() {
        let mut rig = Rig::new();
        let t = rig.now() + 1000;
        rig.external(t, true);
        for _ in 0..4 {
            rig.tick();
        }
        assert_eq!(rig.core.state, BusState::Short);
        rig.external(rig.now() + 100, false);
        assert_eq!(rig.core.state, BusState::Idle);
    }

    #[test]
    fn reply_cannot_start_high() {
        let mut rig = Rig::new();
        rig.transmit(&[0xfe, 0x00], 16);
        assert_eq!(rig.core.state, BusState::WaitRx);
        // A spurious edge interrupt with the line still high.
        rig.core.on_edge();
        assert_eq!(rig.core.state, BusState::Idle);
    }
}
