pub mod address;

/// MASK value, used throughout DALI for "no value" / "missing".
pub const MASK: u8 = 0xff;
