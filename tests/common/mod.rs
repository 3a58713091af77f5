#![allow(dead_code)]
//! Register level model of a FlexCAN controller
//!
//! Emulates the behavior the driver relies on: acknowledge bits of MCR,
//! write-1-to-clear flags, buffer locking through control word reads and the
//! message buffer codes the controller writes back.

use flexcan::bus::{Can, CanConfigurable};
use flexcan::config::CanConfig;
use flexcan::core::{CanId, ClockSource, Dependencies};
use flexcan::embedded_can::{ExtendedId, Id, StandardId};
use flexcan::message::control::{Code, ControlStatus, IdWord};
use flexcan::message::tx::{ClassicFrameType, FrameType, MessageBuilder};
use flexcan::message::Frame;
use flexcan::reg::{self, Registers};
use fugit::{HertzU32, RateExtU32 as _};
use std::cell::RefCell;
use std::collections::HashMap;

pub const RAM_WORDS: usize = 128;
pub const GARBAGE: u32 = 0xDEAD_BEEF;
const MCR_RESET: u32 = 0xD890_000F;
const MCR_MDIS: u32 = 1 << 31;
const MCR_FRZ: u32 = 1 << 30;
const MCR_HALT: u32 = 1 << 28;
const MCR_NOTRDY: u32 = 1 << 27;
const MCR_FRZACK: u32 = 1 << 24;
const MCR_LPMACK: u32 = 1 << 20;
const MCR_SRXDIS: u32 = 1 << 17;
const MCR_FDEN: u32 = 1 << 11;

pub enum Can0 {}

unsafe impl CanId for Can0 {
    const ADDRESS: *const () = core::ptr::null();
    const MESSAGE_BUFFER_WORDS: usize = RAM_WORDS;
}

/// Instance with two RAM blocks, of which the model only backs the first
/// with garbage after reset
pub enum Can1 {}

unsafe impl CanId for Can1 {
    const ADDRESS: *const () = core::ptr::null();
    const MESSAGE_BUFFER_WORDS: usize = 2 * RAM_WORDS;
}

#[derive(Debug)]
pub struct Deps {
    pub clock: HertzU32,
    pub source: ClockSource,
}

impl Default for Deps {
    fn default() -> Self {
        Self {
            clock: 40.MHz(),
            source: ClockSource::Peripheral,
        }
    }
}

unsafe impl Dependencies<Can0> for Deps {
    fn clock_source(&self) -> ClockSource {
        self.source
    }

    fn can_clock(&self) -> HertzU32 {
        self.clock
    }
}

unsafe impl Dependencies<Can1> for Deps {
    fn clock_source(&self) -> ClockSource {
        self.source
    }

    fn can_clock(&self) -> HertzU32 {
        self.clock
    }
}

pub type SimConfigurable<'a> = CanConfigurable<Can0, Deps, &'a SimController>;
pub type SimCan<'a> = Can<Can0, Deps, &'a SimController>;

/// Register access observed by the model
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read(usize),
    Write(usize, u32),
}

/// Acknowledge bit that keeps its current value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stuck {
    LowPower,
    Freeze,
    Ready,
}

/// Frame picked up from a transmit buffer
#[derive(Clone, Debug)]
pub struct Sent {
    pub index: usize,
    pub control: ControlStatus,
    pub id: IdWord,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct State {
    words: HashMap<usize, u32>,
    log: Vec<Access>,
    locked: Option<usize>,
    timer: u16,
    stuck: Option<Stuck>,
    transmitting: Option<usize>,
}

pub struct SimController {
    state: RefCell<State>,
}

impl SimController {
    /// Controller straight out of reset, RAM and individual masks hold
    /// garbage
    pub fn new() -> Self {
        let mut state = State::default();
        state.words.insert(reg::MCR, MCR_RESET);
        for word in 0..RAM_WORDS {
            state.words.insert(reg::RAM + 4 * word, GARBAGE);
        }
        for index in 0..32 {
            state.words.insert(reg::rximr(index), GARBAGE);
        }
        Self {
            state: RefCell::new(state),
        }
    }

    pub fn stick(&self, stuck: Option<Stuck>) {
        self.state.borrow_mut().stuck = stuck;
    }

    pub fn word(&self, offset: usize) -> u32 {
        self.state.borrow().word(offset)
    }

    /// Changes a word behind the driver's back, not logged
    pub fn set_word(&self, offset: usize, value: u32) {
        self.state.borrow_mut().words.insert(offset, value);
    }

    pub fn log(&self) -> Vec<Access> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.log()
            .into_iter()
            .filter_map(|access| match access {
                Access::Write(o, value) if o == offset => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn reads_of(&self, offset: usize) -> usize {
        self.log()
            .into_iter()
            .filter(|access| *access == Access::Read(offset))
            .count()
    }

    /// Offset of the control word of buffer `index` in the current layout
    pub fn control_offset(&self, index: usize) -> usize {
        let words = self.state.borrow().words_per_buffer();
        reg::RAM + index * words * 4
    }

    pub fn control(&self, index: usize) -> ControlStatus {
        ControlStatus::from(self.word(self.control_offset(index)))
    }

    pub fn is_locked(&self, index: usize) -> bool {
        self.state.borrow().locked == Some(index)
    }

    /// Frame of a transmit buffer won arbitration. An abort requested now
    /// stays pending until the frame is sent.
    pub fn win_arbitration(&self, index: usize) {
        self.state.borrow_mut().transmitting = Some(index);
    }

    /// Puts `frame` into the matching receive buffer like the controller
    /// does. Returns the buffer or `None` if no buffer took the frame.
    pub fn deliver(&self, frame: &Frame) -> Option<usize> {
        let mut state = self.state.borrow_mut();
        if !state.operating() {
            return None;
        }
        let words = state.words_per_buffer();
        let incoming = u32::from(IdWord::new(frame.id()));

        let mut candidate = None;
        for index in 0..state.buffers() {
            let base = reg::RAM + index * words * 4;
            let control = ControlStatus::from(state.word(base));
            let code = control.code();
            let receiving = [Code::RX_EMPTY, Code::RX_FULL, Code::RX_OVERRUN].contains(&code);
            if !receiving || control.ide() != frame.is_extended() || state.locked == Some(index) {
                continue;
            }
            let mask = state.word(reg::rximr(index));
            if (state.word(base + 4) ^ incoming) & mask & 0x1FFF_FFFF != 0 {
                continue;
            }
            if code == Code::RX_EMPTY {
                candidate = Some((index, false));
                break;
            }
            if candidate.is_none() {
                candidate = Some((index, true));
            }
        }
        let (index, overrun) = candidate?;

        let base = reg::RAM + index * words * 4;
        state.words.insert(base + 4, incoming);
        for (word, chunk) in frame.data().chunks(4).take(words - 2).enumerate() {
            let mut bytes = [0; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            state
                .words
                .insert(base + 8 + 4 * word, u32::from_be_bytes(bytes));
        }
        let mut control = ControlStatus::with_code(if overrun {
            Code::RX_OVERRUN
        } else {
            Code::RX_FULL
        });
        control.set_edl(frame.fd_format());
        control.set_brs(frame.bit_rate_switching());
        control.set_esi(frame.is_transmitter_error_passive());
        control.set_srr(frame.is_extended());
        control.set_ide(frame.is_extended());
        control.set_rtr(frame.is_remote_frame());
        control.set_dlc(frame.dlc());
        state.timer = state.timer.wrapping_add(1);
        let stamp = u32::from(state.timer);
        state.words.insert(base, u32::from(control) | stamp);
        state.raise_flag(index);
        Some(index)
    }

    /// Sends every pending transmit buffer, including a frame on the wire
    /// whose abort came too late, and writes back the idle code.
    pub fn complete_transmissions(&self) -> Vec<Sent> {
        let mut state = self.state.borrow_mut();
        if !state.operating() {
            return Vec::new();
        }
        let words = state.words_per_buffer();
        let mut sent = Vec::new();
        for index in 0..state.buffers() {
            let base = reg::RAM + index * words * 4;
            let control = ControlStatus::from(state.word(base));
            let on_wire = state.transmitting == Some(index) && control.code() == Code::TX_ABORT;
            if !control.code().is_tx_pending() && !on_wire {
                continue;
            }
            let payload = (0..words - 2)
                .flat_map(|word| state.word(base + 8 + 4 * word).to_be_bytes())
                .collect();
            sent.push(Sent {
                index,
                control,
                id: IdWord::from(state.word(base + 4)),
                payload,
            });
            let mut done = control;
            done.set_code(Code::TX_INACTIVE);
            state.words.insert(base, done.into());
            state.raise_flag(index);
        }
        state.transmitting = None;
        sent
    }
}

impl State {
    fn word(&self, offset: usize) -> u32 {
        self.words.get(&offset).copied().unwrap_or(0)
    }

    fn operating(&self) -> bool {
        self.word(reg::MCR) & (MCR_FRZACK | MCR_LPMACK) == 0
    }

    fn words_per_buffer(&self) -> usize {
        if self.word(reg::MCR) & MCR_FDEN == 0 {
            return 4;
        }
        match (self.word(reg::FDCTRL) >> 16) & 0b11 {
            0 => 4,
            1 => 6,
            2 => 10,
            _ => 18,
        }
    }

    fn buffers(&self) -> usize {
        let maxmb = (self.word(reg::MCR) & 0x7F) as usize + 1;
        (RAM_WORDS / self.words_per_buffer()).min(32).min(maxmb)
    }

    /// Buffer whose control word lives at `offset`
    fn control_word_of(&self, offset: usize) -> Option<usize> {
        let words = self.words_per_buffer();
        let word = offset.checked_sub(reg::RAM)? / 4;
        (offset % 4 == 0 && word < RAM_WORDS && word % words == 0).then(|| word / words)
    }

    fn raise_flag(&mut self, index: usize) {
        let flags = self.word(reg::IFLAG1) | 1 << index;
        self.words.insert(reg::IFLAG1, flags);
    }

    fn write_mcr(&mut self, value: u32) {
        let old = self.word(reg::MCR);
        let keep = |bit: u32, value: bool, stuck: Stuck| {
            if self.stuck == Some(stuck) {
                old & bit != 0
            } else {
                value
            }
        };
        let lpmack = keep(MCR_LPMACK, value & MCR_MDIS != 0, Stuck::LowPower);
        let frozen = value & MCR_FRZ != 0 && value & MCR_HALT != 0;
        let frzack = keep(MCR_FRZACK, frozen && !lpmack, Stuck::Freeze);
        let notrdy = keep(MCR_NOTRDY, lpmack || frzack, Stuck::Ready);

        let mut mcr = value & !(MCR_LPMACK | MCR_FRZACK | MCR_NOTRDY);
        for (bit, set) in [(MCR_LPMACK, lpmack), (MCR_FRZACK, frzack), (MCR_NOTRDY, notrdy)] {
            if set {
                mcr |= bit;
            }
        }
        self.words.insert(reg::MCR, mcr);
    }

    fn write_control(&mut self, index: usize, offset: usize, value: u32) {
        let old = ControlStatus::from(self.word(offset));
        let new = ControlStatus::from(value);
        self.words.insert(offset, value);
        // An abort of a frame on the wire waits for the end of the frame
        if new.code() == Code::TX_ABORT
            && old.code().is_tx_pending()
            && self.transmitting != Some(index)
        {
            self.raise_flag(index);
        }
    }
}

unsafe impl Registers for SimController {
    fn read(&self, offset: usize) -> u32 {
        let mut state = self.state.borrow_mut();
        state.log.push(Access::Read(offset));
        if offset == reg::TIMER {
            state.locked = None;
            return u32::from(state.timer);
        }
        let value = state.word(offset);
        if let Some(index) = state.control_word_of(offset) {
            let code = ControlStatus::from(value).code();
            if code.0 & 0b1000 == 0 && code != Code::RX_INACTIVE {
                state.locked = Some(index);
            }
        }
        value
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.state.borrow_mut();
        state.log.push(Access::Write(offset, value));
        match offset {
            reg::MCR => state.write_mcr(value),
            reg::IFLAG1 => {
                let flags = state.word(reg::IFLAG1) & !value;
                state.words.insert(reg::IFLAG1, flags);
            }
            _ => match state.control_word_of(offset) {
                Some(index) => state.write_control(index, offset, value),
                None => {
                    state.words.insert(offset, value);
                }
            },
        }
    }
}

pub fn standard(id: u16) -> Id {
    StandardId::new(id).unwrap().into()
}

pub fn extended(id: u32) -> Id {
    ExtendedId::new(id).unwrap().into()
}

pub fn classic(id: Id, data: &[u8]) -> Frame {
    MessageBuilder {
        id,
        frame_type: FrameType::Classic(ClassicFrameType::Data(data)),
    }
    .build()
    .unwrap()
}

pub fn remote(id: Id, desired_len: usize) -> Frame {
    MessageBuilder {
        id,
        frame_type: FrameType::Classic(ClassicFrameType::Remote { desired_len }),
    }
    .build()
    .unwrap()
}

pub fn fd(id: Id, payload: &[u8], bit_rate_switching: bool) -> Frame {
    MessageBuilder {
        id,
        frame_type: FrameType::FlexibleDatarate {
            payload,
            bit_rate_switching,
            force_error_state_indicator: false,
        },
    }
    .build()
    .unwrap()
}

/// Frozen controller with the default dependencies
pub fn configurable(sim: &SimController, config: CanConfig) -> SimConfigurable<'_> {
    CanConfigurable::with_registers(sim, config, Deps::default()).unwrap()
}

/// Classic 500 kbit/s bus with receive buffer 0 for 0x511 and transmit
/// buffer 1
pub fn classic_bus(sim: &SimController) -> SimCan<'_> {
    let mut can = configurable(sim, CanConfig::new(500.kHz()));
    can.buffers().receive(0, StandardId::new(0x511).unwrap()).unwrap();
    can.buffers().transmit(1).unwrap();
    can.finalize().unwrap()
}
