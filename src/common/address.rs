//! Typed bus addressing.
//!
//! DALI forward frames carry the destination in the upper seven bits of the
//! first byte. [`AddressByte`] is that first byte with the selector bit
//! preset to 1 (command); the direct arc power path clears it again.

use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressError {
    NotShort,
    NotGroup,
    InvalidAddress,
}

impl fmt::Display for AddressError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressError::NotShort => write!(fmt, "Not a short address"),
            AddressError::NotGroup => write!(fmt, "Not a group address"),
            AddressError::InvalidAddress => write!(fmt, "Invalid address"),
        }
    }
}

/// First byte of a 16-bit forward frame, selector bit set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressByte(pub u8);

/// Short (unicast) address, 0..=63.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Short(u8);

impl Short {
    /// Address 0..=63. Panics outside the range.
    pub fn new(a: u8) -> Short {
        assert!(a < 64);
        Short(a)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Short {
    type Error = AddressError;
    fn try_from(a: u8) -> Result<Short, AddressError> {
        if a < 64 {
            Ok(Short(a))
        } else {
            Err(AddressError::NotShort)
        }
    }
}

impl From<Short> for AddressByte {
    fn from(short: Short) -> Self {
        AddressByte((short.0 << 1) | 1)
    }
}

impl fmt::Display for Short {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Group address, 0..=15.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Group(u8);

impl Group {
    /// Group 0..=15. Panics outside the range.
    pub fn new(a: u8) -> Group {
        assert!(a < 16);
        Group(a)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Group {
    type Error = AddressError;
    fn try_from(a: u8) -> Result<Group, AddressError> {
        if a < 16 {
            Ok(Group(a))
        } else {
            Err(AddressError::NotGroup)
        }
    }
}

impl From<Group> for AddressByte {
    fn from(group: Group) -> AddressByte {
        AddressByte((group.0 << 1) | 0x81)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Any forward frame destination.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Address {
    Short(Short),
    Group(Group),
    Broadcast,
    /// Broadcast to devices without a short address.
    BroadcastUnaddressed,
}

impl Address {
    /// Decode the upper seven bits of a frame's first byte.
    pub fn from_bus_address(bus: u8) -> Result<Address, AddressError> {
        match bus >> 1 {
            a if a < 0x40 => Ok(Address::Short(Short::new(a))),
            a if (0x40..=0x4f).contains(&a) => Ok(Address::Group(Group::new(a & 0x0f))),
            0x7e => Ok(Address::BroadcastUnaddressed),
            0x7f => Ok(Address::Broadcast),
            _ => Err(AddressError::InvalidAddress),
        }
    }
}

impl From<Short> for Address {
    fn from(a: Short) -> Self {
        Address::Short(a)
    }
}

impl From<Group> for Address {
    fn from(a: Group) -> Self {
        Address::Group(a)
    }
}

impl From<Address> for AddressByte {
    fn from(addr: Address) -> AddressByte {
        match addr {
            Address::Short(a) => a.into(),
            Address::Group(a) => a.into(),
            Address::Broadcast => AddressByte(0xff),
            Address::BroadcastUnaddressed => AddressByte(0xfd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_address_bytes() {
        assert_eq!(AddressByte::from(Short::new(0)).0, 0x01);
        assert_eq!(AddressByte::from(Short::new(3)).0, 0x07);
        assert_eq!(AddressByte::from(Short::new(63)).0, 0x7f);
        assert!(Short::try_from(64).is_err());
    }

    #[test]
    fn group_and_broadcast_bytes() {
        assert_eq!(AddressByte::from(Group::new(0)).0, 0x81);
        assert_eq!(AddressByte::from(Group::new(15)).0, 0x9f);
        assert_eq!(AddressByte::from(Address::Broadcast).0, 0xff);
        assert_eq!(AddressByte::from(Address::BroadcastUnaddressed).0, 0xfd);
    }

    #[test]
    fn bus_address_round_trip() {
        assert_eq!(
            Address::from_bus_address(0x07),
            Ok(Address::Short(Short::new(3)))
        );
        assert_eq!(
            Address::from_bus_address(0x83),
            Ok(Address::Group(Group::new(1)))
        );
        assert_eq!(Address::from_bus_address(0xff), Ok(Address::Broadcast));
        assert!(Address::from_bus_address(0xa1).is_err());
    }
}
