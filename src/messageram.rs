//! Message buffer RAM layout and role assignment
//!
//! The controller splits its message buffer RAM into equally sized slots,
//! each holding a control word, an identifier word and the payload. The slot
//! size follows from the configured [`PayloadSize`]; the number of slots from
//! the RAM size published by [`flexcan_core::CanId`].

use crate::bus::OutOfBounds;
use crate::reg::{self, Registers};
use embedded_can::Id;

/// Number of message buffers addressable through the flag registers
pub const MAX_BUFFERS: usize = 32;

/// Payload capacity of a message buffer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadSize {
    /// 8 bytes, the only size usable in classic mode
    #[default]
    Bytes8,
    /// 16 bytes
    Bytes16,
    /// 32 bytes
    Bytes32,
    /// 64 bytes
    Bytes64,
}

impl PayloadSize {
    /// Value of the data size field that selects this payload size
    pub(crate) fn reg(self) -> u8 {
        match self {
            Self::Bytes8 => 0,
            Self::Bytes16 => 1,
            Self::Bytes32 => 2,
            Self::Bytes64 => 3,
        }
    }

    /// Payload capacity in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::Bytes8 => 8,
            Self::Bytes16 => 16,
            Self::Bytes32 => 32,
            Self::Bytes64 => 64,
        }
    }

    /// Size of one message buffer in 32-bit words
    pub fn words_per_buffer(self) -> usize {
        2 + self.bytes() / 4
    }
}

/// Size of one RAM block in 32-bit words. Message buffers never cross a
/// block boundary and every block has its own payload size setting.
pub const BLOCK_WORDS: usize = 128;

/// Number of blocks with a payload size setting in FDCTRL
pub const MAX_BLOCKS: usize = 4;

/// Placement of message buffers in the RAM
///
/// All blocks use the same payload size. Buffers fill the first block, then
/// continue at the start of the next one; the words left at the end of a
/// block stay unused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    payload: PayloadSize,
    buffers: usize,
    blocks: usize,
}

impl Layout {
    /// Fits as many buffers of `payload` as possible into `ram_words`
    pub fn new(ram_words: usize, payload: PayloadSize) -> Self {
        let words = payload.words_per_buffer();
        let full_blocks = ram_words / BLOCK_WORDS;
        let buffers = full_blocks * (BLOCK_WORDS / words) + ram_words % BLOCK_WORDS / words;
        Self {
            payload,
            buffers: buffers.min(MAX_BUFFERS),
            blocks: ram_words.div_ceil(BLOCK_WORDS).min(MAX_BLOCKS),
        }
    }

    /// Payload capacity of every buffer
    pub fn payload(&self) -> PayloadSize {
        self.payload
    }

    /// Number of usable message buffers
    pub fn buffers(&self) -> usize {
        self.buffers
    }

    /// Number of RAM blocks whose payload size has to be programmed
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Byte offset of the control word of buffer `index` from the start of
    /// the register block
    pub fn offset(&self, index: usize) -> Result<usize, OutOfBounds> {
        if index >= self.buffers {
            return Err(OutOfBounds);
        }
        let words = self.payload.words_per_buffer();
        let per_block = BLOCK_WORDS / words;
        let word = index / per_block * BLOCK_WORDS + index % per_block * words;
        Ok(reg::RAM + 4 * word)
    }

    pub(crate) fn slot<'r, R: Registers>(
        &self,
        regs: &'r R,
        index: usize,
    ) -> Result<Slot<'r, R>, OutOfBounds> {
        Ok(Slot {
            regs,
            base: self.offset(index)?,
            payload_words: self.payload.bytes() / 4,
        })
    }
}

/// Zeroes `ram_words` words of message buffer RAM
///
/// Has to run in freeze mode before any buffer is armed; the RAM content is
/// undefined after reset.
pub(crate) fn zero<R: Registers>(regs: &R, ram_words: usize) {
    for word in 0..ram_words {
        regs.write(reg::RAM + 4 * word, 0);
    }
}

/// Word level access to a single message buffer
pub(crate) struct Slot<'r, R> {
    regs: &'r R,
    base: usize,
    payload_words: usize,
}

impl<R: Registers> Slot<'_, R> {
    /// Reading the control word of a receive buffer locks it until the
    /// free running timer is read.
    pub(crate) fn control(&self) -> u32 {
        self.regs.read(self.base)
    }

    pub(crate) fn set_control(&self, value: u32) {
        self.regs.write(self.base, value)
    }

    pub(crate) fn id(&self) -> u32 {
        self.regs.read(self.base + 4)
    }

    pub(crate) fn set_id(&self, value: u32) {
        self.regs.write(self.base + 4, value)
    }

    /// Copies `len` bytes out of the payload words. Byte 0 is the most
    /// significant byte of the first word.
    pub(crate) fn read_payload(&self, data: &mut [u8], len: usize) {
        let words = len.div_ceil(4).min(self.payload_words);
        for (word, chunk) in data.chunks_mut(4).take(words).enumerate() {
            let bytes = self.regs.read(self.base + 8 + 4 * word).to_be_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    /// Writes `len` bytes of payload, padding the last word with zeroes.
    pub(crate) fn write_payload(&self, data: &[u8], len: usize) {
        let words = len.div_ceil(4).min(self.payload_words);
        for word in 0..words {
            let mut bytes = [0; 4];
            for (i, byte) in bytes.iter_mut().enumerate() {
                *byte = data.get(4 * word + i).copied().unwrap_or(0);
            }
            self.regs
                .write(self.base + 8 + 4 * word, u32::from_be_bytes(bytes));
        }
    }
}

/// What a message buffer is used for
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Role {
    /// Not taking part in any traffic
    #[default]
    Inactive,
    /// Receives frames whose identifier matches `id` under the buffer's mask
    Receive {
        /// Acceptance identifier; its format (standard or extended) also
        /// selects which frames the buffer accepts
        id: Id,
    },
    /// Transmits frames handed to [`Tx::transmit`]
    ///
    /// [`Tx::transmit`]: crate::tx_buffers::Tx::transmit
    Transmit,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Role {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Inactive => defmt::write!(f, "Inactive"),
            Self::Receive { id: Id::Standard(id) } => {
                defmt::write!(f, "Receive {{ id: {=u16:#x} }}", id.as_raw())
            }
            Self::Receive { id: Id::Extended(id) } => {
                defmt::write!(f, "Receive {{ id: {=u32:#x}, extended }}", id.as_raw())
            }
            Self::Transmit => defmt::write!(f, "Transmit"),
        }
    }
}

/// Role table of all message buffers, editable in configuration mode
#[derive(Clone, Debug)]
pub struct BufferAssignment {
    roles: [Role; MAX_BUFFERS],
}

impl Default for BufferAssignment {
    fn default() -> Self {
        Self {
            roles: [Role::Inactive; MAX_BUFFERS],
        }
    }
}

impl BufferAssignment {
    /// Assigns `role` to buffer `index`
    ///
    /// Whether the index fits the RAM layout is only known once the payload
    /// size is fixed, so it is checked when the configuration is finalized.
    pub fn set(&mut self, index: usize, role: Role) -> Result<(), OutOfBounds> {
        *self.roles.get_mut(index).ok_or(OutOfBounds)? = role;
        Ok(())
    }

    /// Dedicates buffer `index` to reception of `id`
    pub fn receive(&mut self, index: usize, id: impl Into<Id>) -> Result<(), OutOfBounds> {
        self.set(index, Role::Receive { id: id.into() })
    }

    /// Dedicates buffer `index` to transmission
    pub fn transmit(&mut self, index: usize) -> Result<(), OutOfBounds> {
        self.set(index, Role::Transmit)
    }

    /// Role of buffer `index`
    pub fn role(&self, index: usize) -> Option<Role> {
        self.roles.get(index).copied()
    }

    /// Sets all buffers back to [`Role::Inactive`]
    pub fn clear(&mut self) {
        self.roles = [Role::Inactive; MAX_BUFFERS];
    }

    /// Iterates over `(index, role)` of all buffers that take part in traffic
    pub fn iter(&self) -> impl Iterator<Item = (usize, Role)> + '_ {
        self.roles
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, role)| *role != Role::Inactive)
    }

    pub(crate) fn receive_set(&self) -> u32 {
        self.mask_of(|role| matches!(role, Role::Receive { .. }))
    }

    pub(crate) fn transmit_set(&self) -> u32 {
        self.mask_of(|role| *role == Role::Transmit)
    }

    fn mask_of(&self, f: impl Fn(&Role) -> bool) -> u32 {
        self.roles
            .iter()
            .enumerate()
            .filter(|(_, role)| f(role))
            .fold(0, |set, (index, _)| set | 1 << index)
    }
}
