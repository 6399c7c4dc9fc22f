//! Bit-banged DALI (IEC 62386) bus master for microcontrollers.
//!
//! The crate drives one GPIO pin to pull the DALI line low and samples a
//! second pin for reception. It is structured in layers:
//!
//! - [`bus`] owns the line-level engine: Manchester encoding and decoding,
//!   collision detection and bus fault recovery, driven by a half-bit timer
//!   interrupt and an edge interrupt on the receive pin.
//! - [`controller`] composes forward frames (arc power, commands, special
//!   commands) and offers blocking wait variants on top of the engine.
//! - [`commission`] assigns short addresses by binary search over the
//!   24-bit random addresses of the connected gear.
//! - [`common`] and [`gear`] hold addressing types and the standard
//!   control gear command definitions.
//!
//! Pin access goes through `embedded-hal` digital traits; the half-bit
//! timer and the microsecond clock are injected at [`bus::DaliBus::begin`].
//! All engine state is kept behind a `critical-section` mutex so that the
//! two interrupt entry points ([`bus::DaliBus::tick`] and
//! [`bus::DaliBus::on_edge`]) and thread-context callers can share one
//! `static` instance.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod bus;
#[cfg(feature = "commissioning")]
pub mod commission;
pub mod common;
pub mod controller;
pub mod frame;
pub mod gear;
pub mod timing;

#[cfg(any(test, feature = "simulator"))]
pub mod sim;
