//! Handling of messages/frames

pub mod control;
pub mod tx;

use embedded_can::Id;

/// Data does not fit in the backing buffer
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooMuchData;

/// Largest payload of any frame format
pub const MAX_PAYLOAD: usize = 64;

/// CAN frame/message, either built for transmission or read from a receive
/// buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub(crate) id: Id,
    pub(crate) dlc: u8,
    pub(crate) data: [u8; MAX_PAYLOAD],
    pub(crate) remote: bool,
    pub(crate) fd_format: bool,
    pub(crate) bit_rate_switching: bool,
    pub(crate) error_state_indicator: bool,
    pub(crate) timestamp: u16,
    pub(crate) overrun: bool,
}

impl Frame {
    /// Returns the CAN identifier of the message
    pub fn id(&self) -> Id {
        self.id
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Data length in bytes
    pub fn len(&self) -> usize {
        dlc_to_len(self.dlc, self.fd_format)
    }

    /// `true` if the frame carries no data bytes
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Data field
    pub fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.len()]
        }
    }

    /// Check if the frame uses an extended (29-bit) ID
    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// Remote Transmission Request
    pub fn is_remote_frame(&self) -> bool {
        self.remote
    }

    /// True if the frame uses the CAN FD format
    pub fn fd_format(&self) -> bool {
        self.fd_format
    }

    /// `true` if bit rate switching is used
    pub fn bit_rate_switching(&self) -> bool {
        self.bit_rate_switching
    }

    /// `true` if the sender of the message indicates that it is in "error
    /// passive" state.
    pub fn is_transmitter_error_passive(&self) -> bool {
        self.error_state_indicator
    }

    /// Free running timer value sampled when the frame was received. Zero for
    /// frames built for transmission.
    pub fn timestamp(&self) -> u16 {
        self.timestamp
    }

    /// `true` if the receive buffer was overwritten by this frame before the
    /// previous one had been read. The previous frame is lost; this one is
    /// intact.
    pub fn overrun(&self) -> bool {
        self.overrun
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Classic(tx::ClassicFrameType::Data(data)),
        }
        .build()
        .ok()
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        tx::MessageBuilder {
            id: id.into(),
            frame_type: tx::FrameType::Classic(tx::ClassicFrameType::Remote { desired_len: dlc }),
        }
        .build()
        .ok()
    }

    fn is_extended(&self) -> bool {
        Frame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc.into()
    }

    fn data(&self) -> &[u8] {
        Frame::data(self)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Frame {
    fn format(&self, f: defmt::Formatter) {
        let (id, extended) = match self.id {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        defmt::write!(
            f,
            "Frame {{ id: {=u32:#x}, extended: {=bool}, dlc: {=u8}, fd: {=bool}, overrun: {=bool}, data: {=[u8]:x} }}",
            id,
            extended,
            self.dlc,
            self.fd_format,
            self.overrun,
            self.data()
        )
    }
}

/// Finds the smallest data length code that encodes at least len bytes
pub(crate) fn len_to_dlc(len: usize, fd_format: bool) -> Result<u8, TooMuchData> {
    if fd_format {
        match len {
            0..=8 => Ok(len as u8),
            9..=12 => Ok(9),
            13..=16 => Ok(10),
            17..=20 => Ok(11),
            21..=24 => Ok(12),
            25..=32 => Ok(13),
            33..=48 => Ok(14),
            49..=64 => Ok(15),
            _ => Err(TooMuchData),
        }
    } else {
        match len {
            0..=8 => Ok(len as u8),
            _ => Err(TooMuchData),
        }
    }
}

/// Converts data length code to a length in bytes
pub(crate) fn dlc_to_len(dlc: u8, fd_format: bool) -> usize {
    if fd_format {
        match dlc {
            0..=8 => dlc.into(),
            9 => 12,
            10 => 16,
            11 => 20,
            12 => 24,
            13 => 32,
            14 => 48,
            15.. => 64,
        }
    } else {
        match dlc {
            0..=8 => dlc.into(),
            9.. => 8,
        }
    }
}
