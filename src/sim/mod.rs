//! Deterministic simulation of a DALI segment.
//!
//! The simulation is event driven and runs on a virtual microsecond
//! clock, so timing-sensitive behaviour is exactly reproducible. A
//! [`net::SimNet`] owns a wired-AND line, dispatches decoded forward
//! frames to simulated control gear and schedules their backward frames
//! as edge sequences, exercising the real engine through its interrupt
//! entry points.

pub mod gear;
pub mod net;
pub mod wire;


pub use gear::SimGear;
pub use net::{SimDaliBus, SimNet};
