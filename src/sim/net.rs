//! Event-driven simulation of a bus segment.
//!
//! [`SimNet`] connects one [`DaliBus`] engine, any number of
//! [`SimGear`] devices and an optional external master or fault injector
//! to a wired-AND line. Every change of the resolved line level is fed
//! back into the engine's edge interrupt; a separate wire decoder
//! reassembles frames for gear dispatch and for test assertions.
//!
//! All `SimNet` methods take `&self`; the wait helpers of
//! [`DaliController`](crate::controller::DaliController) can therefore be
//! pumped with `&mut || net.step()` as their `service` closure.

use super::gear::SimGear;
use super::wire::{SimClock, SimRxPin, SimTimer, SimTxPin, WireState};
use crate::bus::DaliBus;
use crate::timing;
use crate::timing::TE_US;
use std::cell::RefCell;
use std::rc::Rc;

const TE: u64 = TE_US as u64;

/// Delay between the end of a forward frame and the gear's backward
/// frame. Mid reply window.
const REPLY_DELAY_US: u64 = 4000;

/// Quiet time after which the wire decoder considers a frame finished.
const FRAME_GAP_US: u64 = 2000;

/// Scheduled edge source for the external master / fault injector.
const EXTERNAL: usize = usize::MAX;

/// The engine type every simulation test drives.
pub type SimDaliBus = DaliBus<SimTxPin, SimRxPin, SimClock, SimTimer>;

struct Edge {
    at_us: u64,
    source: usize,
    pull: bool,
}

/// Frame observed on the wire, engine and gear transmissions alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedFrame {
    pub at_us: u64,
    pub bits: u8,
    pub data: u32,
}

/// Mirror of the engine's receive logic, used to reassemble everything
/// that crosses the wire.
struct Decoder {
    active: bool,
    in_bits: bool,
    error: bool,
    last_edge_us: u64,
    half_bits: u8,
    acc: u32,
}

impl Decoder {
    fn new() -> Decoder {
        Decoder {
            active: false,
            in_bits: false,
            error: false,
            last_edge_us: 0,
            half_bits: 0,
            acc: 0,
        }
    }

    fn edge(&mut self, at_us: u64, level: bool) {
        if !self.active {
            if !level {
                self.active = true;
                self.in_bits = false;
                self.error = false;
                self.half_bits = 0;
                self.acc = 0;
                self.last_edge_us = at_us;
            }
            return;
        }
        let delta = (at_us - self.last_edge_us) as u32;
        self.last_edge_us = at_us;
        if !self.in_bits {
            if level && timing::is_delta_within_te(delta) {
                self.in_bits = true;
            } else {
                self.error = true;
            }
            return;
        }
        if timing::is_delta_within_te(delta) {
            if self.half_bits % 2 == 1 {
                self.acc = (self.acc << 1) | level as u32;
            }
            self.half_bits += 1;
        } else if timing::is_delta_within_2te(delta) {
            self.acc = (self.acc << 1) | level as u32;
            self.half_bits += 2;
        } else {
            self.error = true;
        }
    }

    /// Close the frame; `Some((bits, data, last_edge))` when it decoded
    /// to a known DALI length.
    fn take(&mut self) -> Option<(u8, u32, u64)> {
        let result = if self.error {
            None
        } else {
            match self.half_bits / 2 {
                bits @ (8 | 16 | 24 | 25) => Some((bits, self.acc, self.last_edge_us)),
                _ => None,
            }
        };
        self.active = false;
        result
    }
}

struct NetCore {
    gears: Vec<SimGear>,
    schedule: Vec<Edge>,
    decoder: Decoder,
    observed: Vec<ObservedFrame>,
    last_level: bool,
}

impl NetCore {
    fn insert_edges(&mut self, edges: Vec<Edge>) {
        self.schedule.extend(edges);
        self.schedule.sort_by_key(|edge| edge.at_us);
    }
}

pub struct SimNet<'a> {
    bus: &'a SimDaliBus,
    wire: Rc<RefCell<WireState>>,
    core: RefCell<NetCore>,
}

impl<'a> SimNet<'a> {
    /// Wire `bus` onto a fresh line and initialise it (active high; the
    /// polarity inversion is covered by the phy unit tests).
    pub fn new(bus: &'a SimDaliBus) -> SimNet<'a> {
        let wire = WireState::new();
        bus.begin(
            SimTxPin(wire.clone()),
            SimRxPin(wire.clone()),
            SimClock(wire.clone()),
            SimTimer(wire.clone()),
            false,
        );
        SimNet {
            bus,
            wire,
            core: RefCell::new(NetCore {
                gears: Vec::new(),
                schedule: Vec::new(),
                decoder: Decoder::new(),
                observed: Vec::new(),
                last_level: true,
            }),
        }
    }

    pub fn bus(&self) -> &'a SimDaliBus {
        self.bus
    }

    pub fn add_gear(&self, gear: SimGear) -> usize {
        let mut core = self.core.borrow_mut();
        core.gears.push(gear);
        core.gears.len() - 1
    }

    pub fn now_us(&self) -> u64 {
        self.wire.borrow().now_us
    }

    pub fn line_level(&self) -> bool {
        self.wire.borrow().resolved()
    }

    /// Half-bits the wire decoder has seen of the frame in flight.
    pub fn wire_half_bits(&self) -> u8 {
        self.core.borrow().decoder.half_bits
    }

    pub fn observed(&self) -> Vec<ObservedFrame> {
        self.core.borrow().observed.clone()
    }

    /// 16-bit forward frames seen on the wire, in order.
    pub fn observed_frames16(&self) -> Vec<[u8; 2]> {
        self.core
            .borrow()
            .observed
            .iter()
            .filter(|frame| frame.bits == 16)
            .map(|frame| [(frame.data >> 8) as u8, frame.data as u8])
            .collect()
    }

    pub fn gear_short_address(&self, index: usize) -> u8 {
        self.core.borrow().gears[index].short_address
    }

    pub fn gear_level(&self, index: usize) -> u8 {
        self.core.borrow().gears[index].actual_level
    }

    /// Schedule a forward frame from an external master. `data` holds the
    /// wire bits right-aligned, `bits` ∈ {16, 24, 25}.
    pub fn inject_forward(&self, data: u32, bits: u8, at_us: u64) {
        let edges = frame_edges(data, bits, at_us, EXTERNAL);
        self.core.borrow_mut().insert_edges(edges);
    }

    /// Schedule the external fault injector to force (`true`) or release
    /// (`false`) the line.
    pub fn schedule_pull(&self, at_us: u64, pull: bool) {
        self.core.borrow_mut().insert_edges(vec![Edge {
            at_us,
            source: EXTERNAL,
            pull,
        }]);
    }

    /// Advance to the next event: a scheduled edge or the half-bit tick.
    pub fn step(&self) {
        let next_tick = self.wire.borrow().next_tick_us;
        let next_edge = self.core.borrow().schedule.first().map(|edge| edge.at_us);
        let now = match next_edge {
            Some(edge) if edge <= next_tick => edge,
            _ => next_tick,
        };

        self.finalize_frame(now);

        if Some(now) == next_edge {
            let mut core = self.core.borrow_mut();
            let mut wire = self.wire.borrow_mut();
            wire.now_us = now;
            while core.schedule.first().map(|edge| edge.at_us) == Some(now) {
                let edge = core.schedule.remove(0);
                if edge.source == EXTERNAL {
                    wire.external_pull = edge.pull;
                } else if edge.pull {
                    wire.gear_pulls |= 1 << edge.source;
                } else {
                    wire.gear_pulls &= !(1 << edge.source);
                }
            }
        } else {
            {
                let mut wire = self.wire.borrow_mut();
                wire.now_us = now;
                wire.next_tick_us = now + TE;
            }
            self.bus.tick();
        }
        self.sync_edge(now);
    }

    /// Run until `deadline_us` on the virtual clock.
    pub fn run_until(&self, deadline_us: u64) {
        while self.now_us() < deadline_us {
            self.step();
        }
    }

    /// Run until the engine is idle and the wire is quiet. False if that
    /// does not happen within `max_us`.
    pub fn run_until_idle(&self, max_us: u64) -> bool {
        let deadline = self.now_us() + max_us;
        while self.now_us() < deadline {
            self.step();
            let quiet = {
                let core = self.core.borrow();
                core.schedule.is_empty() && !core.decoder.active
            };
            if quiet && self.bus.is_idle() {
                return true;
            }
        }
        false
    }

    fn sync_edge(&self, now: u64) {
        let level = self.wire.borrow().resolved();
        if level == self.core.borrow().last_level {
            return;
        }
        self.core.borrow_mut().last_level = level;
        self.bus.on_edge();
        self.core.borrow_mut().decoder.edge(now, level);
    }

    /// Close and dispatch a decoded frame once the wire stayed quiet for
    /// the inter-frame gap.
    fn finalize_frame(&self, now: u64) {
        let pending = {
            let core = self.core.borrow();
            core.decoder.active && now > core.decoder.last_edge_us + FRAME_GAP_US
        };
        if !pending {
            return;
        }
        let taken = self.core.borrow_mut().decoder.take();
        let Some((bits, data, last_edge)) = taken else {
            return;
        };
        let mut core = self.core.borrow_mut();
        core.observed.push(ObservedFrame {
            at_us: last_edge,
            bits,
            data,
        });
        if bits != 16 {
            return;
        }
        let frame = [(data >> 8) as u8, data as u8];
        for index in 0..core.gears.len() {
            if let Some(value) = core.gears[index].forward16(frame, last_edge) {
                let edges = frame_edges(value as u32, 8, last_edge + REPLY_DELAY_US, index);
                core.insert_edges(edges);
            }
        }
    }
}

/// Edge schedule of a Manchester frame: one start bit, then `bits` data
/// bits MSB-first, releasing the line after the final half-bit.
fn frame_edges(data: u32, bits: u8, start_us: u64, source: usize) -> Vec<Edge> {
    let mut halves = vec![false, true];
    for i in (0..bits).rev() {
        let bit = data & (1 << i) != 0;
        halves.push(!bit);
        halves.push(bit);
    }
    let mut edges = Vec::new();
    let mut level = true;
    for (slot, half) in halves.iter().enumerate() {
        if *half != level {
            level = *half;
            edges.push(Edge {
                at_us: start_us + slot as u64 * TE,
                source,
                pull: !level,
            });
        }
    }
    if !level {
        edges.push(Edge {
            at_us: start_us + halves.len() as u64 * TE,
            source,
            pull: false,
        });
    }
    edges
}
