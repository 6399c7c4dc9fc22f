//! Standard control gear commands (IEC 62386-102).
//!
//! Every constructor returns a [`Command`] typed with what the sender has
//! to know about it: whether a backward frame is expected and whether the
//! command is a configuration command that only takes effect when
//! transmitted twice within 100 ms. The addressed command set is generated
//! from the opcode table below; scene, group and special commands are
//! written out, their shapes vary too much to be worth a table.

#![allow(non_snake_case)]

use crate::common::address::AddressByte;

/// A ready-to-send 16-bit forward frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Command<const ANSWER: bool, const TWICE: bool>(pub [u8; 2]);

/// Command without a backward frame.
pub type Act = Command<false, false>;
/// Configuration command, transmitted twice to take effect.
pub type Config = Command<false, true>;
/// Query, answered with a backward frame.
pub type Query = Command<true, false>;

impl<const ANSWER: bool, const TWICE: bool> Command<ANSWER, TWICE> {
    fn to<A: Into<AddressByte>>(addr: A, opcode: u8) -> Self {
        Command([addr.into().0, opcode])
    }
}

/// One constructor per table entry; the block header names the command
/// shape it returns.
macro_rules! gear_cmds {
    ($( $kind:ty { $( $(#[$meta:meta])* $name:ident = $opcode:expr, )+ } )+) => {
        $($(
            $(#[$meta])*
            pub fn $name<A: Into<AddressByte>>(addr: A) -> $kind {
                <$kind>::to(addr, $opcode)
            }
        )+)+
    };
}

gear_cmds! {
    Act {
        OFF = 0x00,
        UP = 0x01,
        DOWN = 0x02,
        STEP_UP = 0x03,
        STEP_DOWN = 0x04,
        RECALL_MAX_LEVEL = 0x05,
        RECALL_MIN_LEVEL = 0x06,
        STEP_DOWN_AND_OFF = 0x07,
        ON_AND_STEP_UP = 0x08,
        ENABLE_DAPC = 0x09,
        GO_TO_LAST_ACTIVE_LEVEL = 0x0a,
    }
    Config {
        RESET = 0x20,
        STORE_ACTUAL_LEVEL_IN_DTR0 = 0x21,
        SET_OPERATING_MODE = 0x23,
        IDENTIFY_DEVICE = 0x25,
        SET_MAX_LEVEL = 0x2a,
        SET_MIN_LEVEL = 0x2b,
        SET_SYSTEM_FAILURE_LEVEL = 0x2c,
        SET_POWER_ON_LEVEL = 0x2d,
        SET_FADE_TIME = 0x2e,
        SET_FADE_RATE = 0x2f,
        /// Adopt the short address staged in DTR0 (MASK removes it).
        SET_SHORT_ADDRESS = 0x80,
        ENABLE_WRITE_MEMORY = 0x81,
    }
    Query {
        QUERY_STATUS = 0x90,
        QUERY_CONTROL_GEAR_PRESENT = 0x91,
        QUERY_LAMP_FAILURE = 0x92,
        QUERY_LAMP_POWER_ON = 0x93,
        QUERY_MISSING_SHORT_ADDRESS = 0x96,
        QUERY_VERSION_NUMBER = 0x97,
        QUERY_CONTENT_DTR0 = 0x98,
        QUERY_DEVICE_TYPE = 0x99,
        QUERY_PHYSICAL_MINIMUM = 0x9a,
        QUERY_ACTUAL_LEVEL = 0xa0,
        QUERY_MAX_LEVEL = 0xa1,
        QUERY_MIN_LEVEL = 0xa2,
        QUERY_POWER_ON_LEVEL = 0xa3,
        QUERY_GROUPS_0_7 = 0xc0,
        QUERY_GROUPS_8_15 = 0xc1,
        QUERY_RANDOM_ADDRESS_H = 0xc2,
        QUERY_RANDOM_ADDRESS_M = 0xc3,
        QUERY_RANDOM_ADDRESS_L = 0xc4,
        READ_MEMORY_LOCATION = 0xc5,
    }
}

/// Direct arc power control. The selector bit is cleared: the second byte
/// carries the level, not a command number.
pub fn DAPC<A: Into<AddressByte>>(addr: A, level: u8) -> Act {
    Command([addr.into().0 & 0xfe, level])
}

// Scene and group membership commands fold the scene or group number into
// the opcode's low nibble.

pub fn GOTO_SCENE<A: Into<AddressByte>>(addr: A, scene: u8) -> Act {
    Act::to(addr, 0x10 + scene)
}

pub fn SET_SCENE<A: Into<AddressByte>>(addr: A, scene: u8) -> Config {
    Config::to(addr, 0x40 + scene)
}

pub fn REMOVE_FROM_SCENE<A: Into<AddressByte>>(addr: A, scene: u8) -> Config {
    Config::to(addr, 0x50 + scene)
}

pub fn ADD_TO_GROUP<A: Into<AddressByte>>(addr: A, group: u8) -> Config {
    Config::to(addr, 0x60 + group)
}

pub fn REMOVE_FROM_GROUP<A: Into<AddressByte>>(addr: A, group: u8) -> Config {
    Config::to(addr, 0x70 + group)
}

pub fn QUERY_SCENE_LEVEL<A: Into<AddressByte>>(addr: A, scene: u8) -> Query {
    Query::to(addr, 0xb0 + scene)
}

// Special commands (opcodes 256..=287) carry no destination; the first
// byte is the opcode itself, 0xa1, 0xa3, .. 0xdf.

pub const fn TERMINATE() -> Act {
    Command([0xa1, 0x00])
}

pub const fn DTR0(data: u8) -> Act {
    Command([0xa3, data])
}

pub const fn INITIALISE_ALL() -> Config {
    Command([0xa5, 0x00])
}

pub const fn INITIALISE_NO_ADDR() -> Config {
    Command([0xa5, 0xff])
}

/// INITIALISE addressed to one short address.
pub fn INITIALISE_ADDR<A: Into<AddressByte>>(addr: A) -> Config {
    Command([0xa5, addr.into().0])
}

pub const fn RANDOMISE() -> Config {
    Command([0xa7, 0x00])
}

pub const fn COMPARE() -> Query {
    Command([0xa9, 0x00])
}

pub const fn WITHDRAW() -> Act {
    Command([0xab, 0x00])
}

pub const fn SEARCHADDRH(data: u8) -> Act {
    Command([0xb1, data])
}

pub const fn SEARCHADDRM(data: u8) -> Act {
    Command([0xb3, data])
}

pub const fn SEARCHADDRL(data: u8) -> Act {
    Command([0xb5, data])
}

pub fn PROGRAM_SHORT_ADDRESS<A: Into<AddressByte>>(addr: A) -> Act {
    Command([0xb7, addr.into().0])
}

pub fn VERIFY_SHORT_ADDRESS<A: Into<AddressByte>>(addr: A) -> Query {
    Command([0xb9, addr.into().0])
}

pub const fn QUERY_SHORT_ADDRESS() -> Query {
    Command([0xbb, 0x00])
}

pub const fn ENABLE_DEVICE_TYPE(data: u8) -> Act {
    Command([0xc1, data])
}

pub const fn DTR1(data: u8) -> Act {
    Command([0xc3, data])
}

pub const fn DTR2(data: u8) -> Act {
    Command([0xc5, data])
}

pub const fn WRITE_MEMORY_LOCATION(data: u8) -> Query {
    Command([0xc7, data])
}

pub const fn WRITE_MEMORY_LOCATION_NO_REPLY(data: u8) -> Act {
    Command([0xc9, data])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::address::{Address, Short};

    #[test]
    fn special_command_bytes() {
        assert_eq!(TERMINATE().0, [0xa1, 0x00]);
        assert_eq!(DTR0(0xff).0, [0xa3, 0xff]);
        assert_eq!(INITIALISE_ALL().0, [0xa5, 0x00]);
        assert_eq!(INITIALISE_NO_ADDR().0, [0xa5, 0xff]);
        assert_eq!(RANDOMISE().0, [0xa7, 0x00]);
        assert_eq!(COMPARE().0, [0xa9, 0x00]);
        assert_eq!(WITHDRAW().0, [0xab, 0x00]);
        assert_eq!(SEARCHADDRH(0x12).0, [0xb1, 0x12]);
        assert_eq!(SEARCHADDRM(0x34).0, [0xb3, 0x34]);
        assert_eq!(SEARCHADDRL(0x56).0, [0xb5, 0x56]);
        assert_eq!(PROGRAM_SHORT_ADDRESS(Short::new(7)).0, [0xb7, 0x0f]);
        assert_eq!(VERIFY_SHORT_ADDRESS(Short::new(7)).0, [0xb9, 0x0f]);
        assert_eq!(QUERY_SHORT_ADDRESS().0, [0xbb, 0x00]);
        assert_eq!(DTR1(0x01).0, [0xc3, 0x01]);
        assert_eq!(DTR2(0x02).0, [0xc5, 0x02]);
    }

    #[test]
    fn addressed_command_bytes() {
        assert_eq!(QUERY_ACTUAL_LEVEL(Short::new(3)).0, [0x07, 0xa0]);
        assert_eq!(DAPC(Address::Broadcast, 0x00).0, [0xfe, 0x00]);
        assert_eq!(SET_SHORT_ADDRESS(Address::Broadcast).0, [0xff, 0x80]);
        assert_eq!(GOTO_SCENE(Short::new(0), 4).0, [0x01, 0x14]);
    }
}
