//! Frame composition and blocking transactions.
//!
//! [`DaliController`] borrows the bus engine and adds the controller-side
//! conveniences: building 16-bit forward frames from logical arguments,
//! sending typed [`Command`]s, and blocking `*_wait` variants that poll the
//! engine against a millisecond deadline.
//!
//! The `*_wait` methods take a `service` closure that is called while
//! spinning, so a cooperative main loop can keep other work (or a WFI)
//! going during the up-to-50 ms a transaction takes. Pass `&mut || {}`
//! when there is nothing to service.

use crate::bus::phy::{BusClock, TickTimer};
use crate::bus::{DaliBus, DaliSendResult};
use crate::common::address::{Address, AddressByte};
use crate::gear::cmd_defs::Command;
use embedded_hal::digital::{InputPin, OutputPin};
use log::trace;

/// Default transaction deadline in milliseconds. One transaction is
/// bounded by settling time, the forward frame, the reply window and the
/// backward frame, about 42 ms worst case.
pub const DEFAULT_TIMEOUT_MS: u32 = 50;

/// Configuration commands in this range must be transmitted twice within
/// 100 ms to take effect.
const CONFIG_RANGE: core::ops::RangeInclusive<u8> = 32..=142;

/// Controller-side access to one [`DaliBus`].
pub struct DaliController<'a, TX, RX, C, T> {
    bus: &'a DaliBus<TX, RX, C, T>,
}

impl<'a, TX, RX, C, T> DaliController<'a, TX, RX, C, T>
where
    TX: OutputPin,
    RX: InputPin,
    C: BusClock,
    T: TickTimer,
{
    pub fn new(bus: &'a DaliBus<TX, RX, C, T>) -> Self {
        DaliController { bus }
    }

    pub fn bus(&self) -> &'a DaliBus<TX, RX, C, T> {
        self.bus
    }

    /// Send a typed command without waiting. Double-send semantics are the
    /// caller's responsibility on this path.
    pub fn send<const ANSWER: bool, const TWICE: bool>(
        &self,
        cmd: Command<ANSWER, TWICE>,
    ) -> DaliSendResult {
        trace!("tx {:02x} {:02x}", cmd.0[0], cmd.0[1]);
        self.bus.send_raw(&cmd.0, 16)
    }

    /// Send a typed command and wait for the outcome. Commands marked
    /// `TWICE` are transmitted twice; commands marked `ANSWER` return the
    /// backward frame.
    pub fn send_wait<const ANSWER: bool, const TWICE: bool>(
        &self,
        cmd: Command<ANSWER, TWICE>,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        if TWICE {
            let result = self.send_raw_wait(&cmd.0, 16, timeout_ms, service);
            if result != DaliSendResult::Empty {
                return result;
            }
        }
        self.send_raw_wait(&cmd.0, 16, timeout_ms, service)
    }

    /// Direct arc power control, fire and forget.
    pub fn send_arc(&self, addr: Address, level: u8) -> DaliSendResult {
        self.bus
            .send_raw(&[AddressByte::from(addr).0 & 0xfe, level], 16)
    }

    /// Direct arc power control to every device on the bus.
    pub fn send_arc_broadcast(&self, level: u8) -> DaliSendResult {
        self.send_arc(Address::Broadcast, level)
    }

    /// Direct arc power control, waiting for the bus transaction.
    pub fn send_arc_wait(
        &self,
        addr: Address,
        level: u8,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        self.send_raw_wait(
            &[AddressByte::from(addr).0 & 0xfe, level],
            16,
            timeout_ms,
            service,
        )
    }

    pub fn send_arc_broadcast_wait(
        &self,
        level: u8,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        self.send_arc_wait(Address::Broadcast, level, timeout_ms, service)
    }

    /// Send a numbered command (0..=255), fire and forget. Configuration
    /// commands are not doubled on this path.
    pub fn send_cmd(&self, addr: Address, command: u8) -> DaliSendResult {
        self.bus
            .send_raw(&[AddressByte::from(addr).0 | 1, command], 16)
    }

    pub fn send_cmd_broadcast(&self, command: u8) -> DaliSendResult {
        self.send_cmd(Address::Broadcast, command)
    }

    /// Send a numbered command and wait. Configuration commands
    /// (32..=142) are transmitted twice; any non-empty outcome of the
    /// first transmission short-circuits.
    pub fn send_cmd_wait(
        &self,
        addr: Address,
        command: u8,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        let frame = [AddressByte::from(addr).0 | 1, command];
        let sends = if CONFIG_RANGE.contains(&command) { 2 } else { 1 };
        let mut result = DaliSendResult::Empty;
        for _ in 0..sends {
            result = self.send_raw_wait(&frame, 16, timeout_ms, service);
            if result != DaliSendResult::Empty {
                return result;
            }
        }
        result
    }

    pub fn send_cmd_broadcast_wait(
        &self,
        command: u8,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        self.send_cmd_wait(Address::Broadcast, command, timeout_ms, service)
    }

    /// Send a special command by number (256..=287), fire and forget.
    pub fn send_special_cmd(&self, command: u16, value: u8) -> DaliSendResult {
        let Some(first) = special_cmd_byte(command) else {
            return DaliSendResult::InvalidParameter;
        };
        self.bus.send_raw(&[first, value], 16)
    }

    /// Send a special command by number and wait.
    pub fn send_special_cmd_wait(
        &self,
        command: u16,
        value: u8,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        let Some(first) = special_cmd_byte(command) else {
            return DaliSendResult::InvalidParameter;
        };
        self.send_raw_wait(&[first, value], 16, timeout_ms, service)
    }

    /// Send a raw frame and wait for the transaction to finish.
    ///
    /// Waits for the bus to become idle, transmits, waits for the reply
    /// window to close and returns the response slot. `ReadyTimeout`
    /// reports a bus that never went idle, `SendTimeout` a transaction
    /// that never completed.
    pub fn send_raw_wait(
        &self,
        data: &[u8],
        bits: u8,
        timeout_ms: u32,
        service: &mut impl FnMut(),
    ) -> DaliSendResult {
        let started = self.bus.millis();
        while !self.bus.is_idle() {
            if self.bus.millis().wrapping_sub(started) > timeout_ms {
                return DaliSendResult::ReadyTimeout;
            }
            service();
        }

        let result = self.bus.send_raw(data, bits);
        if result != DaliSendResult::Sent {
            return result;
        }

        while !self.bus.is_idle() {
            if self.bus.millis().wrapping_sub(started) > timeout_ms {
                return DaliSendResult::SendTimeout;
            }
            service();
        }
        self.bus.last_response().into()
    }
}

/// First byte of a special command frame: opcodes 256..=271 map onto
/// 0xa1, 0xa3, … 0xbf and 272..=287 onto 0xc1, 0xc3, … 0xdf.
fn special_cmd_byte(command: u16) -> Option<u8> {
    if !(256..=287).contains(&command) {
        return None;
    }
    Some((((command - 256 + 16) as u8) << 1) | 0x81)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_command_encoding() {
        assert_eq!(special_cmd_byte(256), Some(0xa1));
        assert_eq!(special_cmd_byte(258), Some(0xa5));
        assert_eq!(special_cmd_byte(271), Some(0xbf));
        assert_eq!(special_cmd_byte(272), Some(0xc1));
        assert_eq!(special_cmd_byte(287), Some(0xdf));
        assert_eq!(special_cmd_byte(255), None);
        assert_eq!(special_cmd_byte(288), None);
    }

    #[test]
    fn config_command_range() {
        assert!(CONFIG_RANGE.contains(&32));
        assert!(CONFIG_RANGE.contains(&142));
        assert!(!CONFIG_RANGE.contains(&31));
        assert!(!CONFIG_RANGE.contains(&143));
        assert!(!CONFIG_RANGE.contains(&160));
    }
}
