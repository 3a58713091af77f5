//! Control and identifier words of a message buffer

use bitfield::bitfield;
use embedded_can::{ExtendedId, Id, StandardId};

/// Message buffer code
///
/// Receive and transmit codes share the 4-bit field; the most significant
/// bit tells them apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Code(pub u8);

impl Code {
    /// Receive buffer not active
    pub const RX_INACTIVE: Self = Self(0b0000);
    /// Receive buffer armed, waiting for a frame
    pub const RX_EMPTY: Self = Self(0b0100);
    /// Receive buffer holds a frame
    pub const RX_FULL: Self = Self(0b0010);
    /// Receive buffer was overwritten before it was read
    pub const RX_OVERRUN: Self = Self(0b0110);
    /// Receive buffer waiting to answer a remote request
    pub const RX_RANSWER: Self = Self(0b1010);
    /// Set on receive codes while the controller updates the buffer
    pub const RX_BUSY: u8 = 0b0001;
    /// Transmit buffer idle
    pub const TX_INACTIVE: Self = Self(0b1000);
    /// Transmission of the buffer was aborted
    pub const TX_ABORT: Self = Self(0b1001);
    /// Transmit buffer armed for transmission
    pub const TX_DATA: Self = Self(0b1100);
    /// Transmit buffer armed as remote response
    pub const TX_TANSWER: Self = Self(0b1110);

    /// The controller is currently updating a receive buffer
    pub fn is_busy(self) -> bool {
        self.0 & 0b1000 == 0 && self.0 & Self::RX_BUSY != 0
    }

    /// Transmit buffer waiting for, or taking part in, arbitration
    pub fn is_tx_pending(self) -> bool {
        self == Self::TX_DATA || self == Self::TX_TANSWER
    }
}

bitfield! {
    /// Control and status word of a message buffer
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ControlStatus(u32);
    impl Debug;
    /// Extended Data Length, CAN FD frame
    pub edl, set_edl: 31;
    /// Bit Rate Switch
    pub brs, set_brs: 30;
    /// Error State Indicator
    pub esi, set_esi: 29;
    /// Message buffer code
    pub u8, from into Code, code, set_code: 27, 24;
    /// Substitute Remote Request
    pub srr, set_srr: 22;
    /// ID Extended bit
    pub ide, set_ide: 21;
    /// Remote Transmission Request
    pub rtr, set_rtr: 20;
    /// Data Length Code
    pub u8, dlc, set_dlc: 19, 16;
    /// Free running timer value captured when the frame was handled
    pub u16, timestamp, _: 15, 0;
}

impl From<u8> for Code {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Code> for u8 {
    fn from(value: Code) -> Self {
        value.0
    }
}

impl From<u32> for ControlStatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ControlStatus> for u32 {
    fn from(value: ControlStatus) -> Self {
        value.0
    }
}

impl ControlStatus {
    /// Control word with all fields cleared and `code` set
    pub fn with_code(code: Code) -> Self {
        let mut word = Self(0);
        word.set_code(code);
        word
    }
}

bitfield! {
    /// Identifier word of a message buffer
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct IdWord(u32);
    impl Debug;
    /// Local priority, only used for transmit arbitration
    pub u8, prio, set_prio: 31, 29;
    /// Standard identifier
    pub u16, std, set_std: 28, 18;
    /// Extended identifier
    pub u32, ext, set_ext: 28, 0;
}

impl From<u32> for IdWord {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<IdWord> for u32 {
    fn from(value: IdWord) -> Self {
        value.0
    }
}

impl IdWord {
    /// Places `id` where the controller expects it
    pub fn new(id: Id) -> Self {
        let mut word = Self(0);
        match id {
            Id::Standard(id) => word.set_std(id.as_raw()),
            Id::Extended(id) => word.set_ext(id.as_raw()),
        }
        word
    }

    /// Interprets the word as a standard or extended identifier
    pub fn to_id(self, extended: bool) -> Id {
        if extended {
            // The field is 29 bits wide, so it is always a valid identifier
            Id::Extended(ExtendedId::new(self.ext()).unwrap_or(ExtendedId::ZERO))
        } else {
            // The field is 11 bits wide, so it is always a valid identifier
            Id::Standard(StandardId::new(self.std()).unwrap_or(StandardId::ZERO))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn control_word_round_trip() {
        let mut word = ControlStatus(0);
        word.set_edl(true);
        word.set_brs(true);
        word.set_code(Code::TX_DATA);
        word.set_srr(true);
        word.set_dlc(15);
        assert_eq!(u32::from(word), 0xCC4F_0000);

        let word = ControlStatus::from(0xCC4F_0000);
        assert!(word.edl());
        assert!(word.brs());
        assert!(!word.esi());
        assert_eq!(word.code(), Code::TX_DATA);
        assert_eq!(word.dlc(), 15);
    }

    #[test]
    fn classic_transmit_word() {
        let mut word = ControlStatus::with_code(Code::TX_DATA);
        word.set_srr(true);
        word.set_dlc(8);
        assert_eq!(u32::from(word), 0x0C48_0000);
    }

    #[test]
    fn receive_codes_decode() {
        let word = ControlStatus::from(0x0226_1234);
        assert_eq!(word.code(), Code::RX_FULL);
        assert!(word.ide());
        assert_eq!(word.dlc(), 6);
        assert_eq!(word.timestamp(), 0x1234);
        assert!(ControlStatus::from(0x0300_0000).code().is_busy());
        assert!(!Code::TX_ABORT.is_busy());
        assert!(Code::TX_TANSWER.is_tx_pending());
        assert!(!Code::TX_INACTIVE.is_tx_pending());
    }

    #[test]
    fn standard_id_placement() {
        let word = IdWord::new(StandardId::new(0x555).unwrap().into());
        assert_eq!(u32::from(word), 0x1554_0000);
        assert_eq!(
            IdWord::from(0x1444_0000).to_id(false),
            Id::Standard(StandardId::new(0x511).unwrap())
        );
    }

    #[test]
    fn extended_id_placement() {
        let id = ExtendedId::new(0x1234_5678).unwrap();
        let word = IdWord::new(id.into());
        assert_eq!(u32::from(word), 0x1234_5678);
        assert_eq!(word.to_id(true), Id::Extended(id));
    }
}
