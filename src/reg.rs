//! Register map and raw register access
//!
//! The FlexCAN register block is described by its word offsets and by
//! [`bitfield`] views over the registers the driver interprets. Access goes
//! through the [`Registers`] trait so the protocols can run against MMIO
//! ([`Mmio`]) as well as against any other backend implementing the trait.

use bitfield::bitfield;
use core::marker::PhantomData;
use flexcan_core::CanId;
use vcell::VolatileCell;

/// Module Configuration Register
pub const MCR: usize = 0x00;
/// Control 1 Register
pub const CTRL1: usize = 0x04;
/// Free Running Timer
pub const TIMER: usize = 0x08;
/// Rx Mailboxes Global Mask Register
pub const RXMGMASK: usize = 0x10;
/// Error Counter
pub const ECR: usize = 0x1C;
/// Error and Status 1 Register
pub const ESR1: usize = 0x20;
/// Interrupt Masks 1 Register
pub const IMASK1: usize = 0x28;
/// Interrupt Flags 1 Register
pub const IFLAG1: usize = 0x30;
/// Control 2 Register
pub const CTRL2: usize = 0x34;
/// CAN Bit Timing Register
pub const CBT: usize = 0x50;
/// Start of the message buffer RAM
pub const RAM: usize = 0x80;
/// Start of the Rx Individual Mask Registers
pub const RXIMR: usize = 0x880;
/// CAN FD Control Register
pub const FDCTRL: usize = 0xC00;
/// CAN FD Bit Timing Register
pub const FDCBT: usize = 0xC04;

/// Offset of the individual mask register of message buffer `index`
pub const fn rximr(index: usize) -> usize {
    RXIMR + 4 * index
}

/// Raw access to a FlexCAN register block
///
/// # Safety
/// Implementors must give the caller exclusive access to a single FlexCAN
/// register block (or a faithful model of one). `read` and `write` must not
/// be elided, merged or reordered with respect to each other, as the
/// receive protocol relies on reads with side effects (locking a message
/// buffer, unlocking it via [`TIMER`]).
pub unsafe trait Registers {
    /// Reads the 32-bit word at `offset` bytes from the start of the block
    fn read(&self, offset: usize) -> u32;
    /// Writes the 32-bit word at `offset` bytes from the start of the block
    fn write(&self, offset: usize, value: u32);

    /// Reads a register through its typed view
    fn get<T: Register>(&self) -> T
    where
        Self: Sized,
    {
        T::from(self.read(T::OFFSET))
    }

    /// Writes a register through its typed view
    fn set<T: Register>(&self, value: T)
    where
        Self: Sized,
    {
        self.write(T::OFFSET, value.into())
    }

    /// Read-modify-write of a register through its typed view
    ///
    /// Never use this for write-one-to-clear registers such as [`IFLAG1`].
    fn modify<T: Register>(&self, f: impl FnOnce(&mut T))
    where
        Self: Sized,
    {
        let mut value = self.get::<T>();
        f(&mut value);
        self.set(value);
    }
}

// Safety: Forwards to the exclusive backend behind the reference.
unsafe impl<R: Registers + ?Sized> Registers for &R {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// Typed view of a register at a fixed offset
pub trait Register: Copy + From<u32> + Into<u32> {
    /// Offset of the register from the start of the block
    const OFFSET: usize;
}

macro_rules! register {
    ($name:ident, $offset:expr) => {
        impl Register for $name {
            const OFFSET: usize = $offset;
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

bitfield! {
    /// Module Configuration Register
    #[derive(Copy, Clone)]
    pub struct Mcr(u32);
    impl Debug;
    /// Module Disable
    pub mdis, set_mdis: 31;
    /// Freeze Enable
    pub frz, set_frz: 30;
    /// Rx FIFO Enable
    pub rfen, set_rfen: 29;
    /// Halt FlexCAN
    pub halt, set_halt: 28;
    /// FlexCAN Not Ready
    pub notrdy, _: 27;
    /// Soft Reset
    pub softrst, set_softrst: 25;
    /// Freeze Mode Acknowledge
    pub frzack, _: 24;
    /// Supervisor Mode
    pub supv, set_supv: 23;
    /// Warning Interrupt Enable
    pub wrnen, set_wrnen: 21;
    /// Low-Power Mode Acknowledge
    pub lpmack, _: 20;
    /// Self Reception Disable
    pub srxdis, set_srxdis: 17;
    /// Individual Rx Masking And Queue Enable
    pub irmq, set_irmq: 16;
    /// Abort Enable
    pub aen, set_aen: 12;
    /// CAN FD operation enable
    pub fden, set_fden: 11;
    /// Number Of The Last Message Buffer
    pub u8, maxmb, set_maxmb: 6, 0;
}
register!(Mcr, MCR);

bitfield! {
    /// Control 1 Register
    #[derive(Copy, Clone)]
    pub struct Ctrl1(u32);
    impl Debug;
    /// Bus Off Interrupt Mask
    pub boffmsk, set_boffmsk: 15;
    /// Error Interrupt Mask
    pub errmsk, set_errmsk: 14;
    /// CAN Engine Clock Source
    pub clksrc, set_clksrc: 13;
    /// Loop Back Mode
    pub lpb, set_lpb: 12;
    /// Sampling Mode (three samples per bit)
    pub smp, set_smp: 7;
    /// Bus Off Recovery disable
    pub boffrec, set_boffrec: 6;
    /// Listen-Only Mode
    pub lom, set_lom: 3;
}
register!(Ctrl1, CTRL1);

bitfield! {
    /// Control 2 Register
    #[derive(Copy, Clone)]
    pub struct Ctrl2(u32);
    impl Debug;
    /// Error-correction Configuration Register Write Enable
    pub ecrwre, set_ecrwre: 29;
    /// Remote Request Storing
    pub rrs, set_rrs: 17;
    /// Entire Frame Arbitration Field Comparison Enable For Rx Mailboxes
    pub eacen, set_eacen: 16;
    /// ISO CAN FD Enable
    pub isocanfden, set_isocanfden: 12;
}
register!(Ctrl2, CTRL2);

bitfield! {
    /// CAN Bit Timing Register
    ///
    /// All segment fields hold the segment length minus one.
    #[derive(Copy, Clone)]
    pub struct Cbt(u32);
    impl Debug;
    /// Bit Timing Format Enable
    pub btf, set_btf: 31;
    /// Extended Prescaler Division Factor
    pub u16, epresdiv, set_epresdiv: 30, 21;
    /// Extended Resync Jump Width
    pub u8, erjw, set_erjw: 20, 16;
    /// Extended Propagation Segment
    pub u8, epropseg, set_epropseg: 15, 10;
    /// Extended Phase Segment 1
    pub u8, epseg1, set_epseg1: 9, 5;
    /// Extended Phase Segment 2
    pub u8, epseg2, set_epseg2: 4, 0;
}
register!(Cbt, CBT);

bitfield! {
    /// CAN FD Bit Timing Register
    ///
    /// `fpropseg` holds the real segment length, all other segment fields
    /// hold the length minus one.
    #[derive(Copy, Clone)]
    pub struct Fdcbt(u32);
    impl Debug;
    /// Fast Prescaler Division Factor
    pub u16, fpresdiv, set_fpresdiv: 29, 20;
    /// Fast Resync Jump Width
    pub u8, frjw, set_frjw: 18, 16;
    /// Fast Propagation Segment
    pub u8, fpropseg, set_fpropseg: 14, 10;
    /// Fast Phase Segment 1
    pub u8, fpseg1, set_fpseg1: 7, 5;
    /// Fast Phase Segment 2
    pub u8, fpseg2, set_fpseg2: 2, 0;
}
register!(Fdcbt, FDCBT);

bitfield! {
    /// CAN FD Control Register
    #[derive(Copy, Clone)]
    pub struct Fdctrl(u32);
    impl Debug;
    /// Bit Rate Switch Enable
    pub fdrate, set_fdrate: 31;
    /// Message Buffer Data Size for Region 3
    pub u8, mbdsr3, set_mbdsr3: 26, 25;
    /// Message Buffer Data Size for Region 2
    pub u8, mbdsr2, set_mbdsr2: 24, 23;
    /// Message Buffer Data Size for Region 1
    pub u8, mbdsr1, set_mbdsr1: 20, 19;
    /// Message Buffer Data Size for Region 0
    pub u8, mbdsr0, set_mbdsr0: 17, 16;
    /// Transceiver Delay Compensation Enable
    pub tdcen, set_tdcen: 15;
    /// Transceiver Delay Compensation Fail
    pub tdcfail, _: 14;
    /// Transceiver Delay Compensation Offset
    pub u8, tdcoff, set_tdcoff: 12, 8;
    /// Transceiver Delay Compensation Value
    pub u8, tdcval, _: 5, 0;
}
register!(Fdctrl, FDCTRL);

impl Fdctrl {
    /// Sets the message buffer data size of RAM region `region`. Regions
    /// beyond the fourth do not exist and are ignored.
    pub fn set_region_data_size(&mut self, region: usize, size: u8) {
        match region {
            0 => self.set_mbdsr0(size),
            1 => self.set_mbdsr1(size),
            2 => self.set_mbdsr2(size),
            3 => self.set_mbdsr3(size),
            _ => {}
        }
    }
}

bitfield! {
    /// Error Counter
    #[derive(Copy, Clone)]
    pub struct Ecr(u32);
    impl Debug;
    /// Receive Error Counter for fast bits
    pub u8, rxerrcnt_fast, _: 31, 24;
    /// Transmit Error Counter for fast bits
    pub u8, txerrcnt_fast, _: 23, 16;
    /// Receive Error Counter
    pub u8, rxerrcnt, _: 15, 8;
    /// Transmit Error Counter
    pub u8, txerrcnt, _: 7, 0;
}
register!(Ecr, ECR);

bitfield! {
    /// Error and Status 1 Register
    #[derive(Copy, Clone)]
    pub struct Esr1(u32);
    impl Debug;
    /// Bit1 Error in the Data Phase of CAN FD frames
    pub bit1err_fast, _: 31;
    /// Bit0 Error in the Data Phase of CAN FD frames
    pub bit0err_fast, _: 30;
    /// CRC Error in the Data Phase of CAN FD frames
    pub crcerr_fast, _: 28;
    /// Form Error in the Data Phase of CAN FD frames
    pub frmerr_fast, _: 27;
    /// Stuffing Error in the Data Phase of CAN FD frames
    pub stferr_fast, _: 26;
    /// Error Overrun
    pub errovr, _: 21;
    /// Bus Off Done Interrupt
    pub boffdoneint, _: 19;
    /// CAN Synchronization Status
    pub synch, _: 18;
    /// Tx Warning Interrupt Flag
    pub twrnint, _: 17;
    /// Rx Warning Interrupt Flag
    pub rwrnint, _: 16;
    /// Bit1 Error
    pub bit1err, _: 15;
    /// Bit0 Error
    pub bit0err, _: 14;
    /// Acknowledge Error
    pub ackerr, _: 13;
    /// Cyclic Redundancy Check Error
    pub crcerr, _: 12;
    /// Form Error
    pub frmerr, _: 11;
    /// Stuffing Error
    pub stferr, _: 10;
    /// Tx Error Warning
    pub txwrn, _: 9;
    /// Rx Error Warning
    pub rxwrn, _: 8;
    /// Idle
    pub idle, _: 7;
    /// FlexCAN In Transmission
    pub tx, _: 6;
    /// Fault Confinement State
    pub u8, fltconf, _: 5, 4;
    /// FlexCAN In Reception
    pub rx, _: 3;
    /// Bus Off Interrupt
    pub boffint, _: 2;
    /// Error Interrupt
    pub errint, _: 1;
}
register!(Esr1, ESR1);

/// Volatile access to the memory mapped register block of peripheral `Id`
pub struct Mmio<Id> {
    _id: PhantomData<Id>,
}

impl<Id> Clone for Mmio<Id> {
    fn clone(&self) -> Self {
        Self { _id: PhantomData }
    }
}

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The caller must own the peripheral referenced by `Id`. Every clone of
    /// the returned value aliases the same registers, so the handles must
    /// only be distributed to components owning disjoint register sets.
    pub(crate) unsafe fn new() -> Self {
        Self { _id: PhantomData }
    }

    fn cell(&self, offset: usize) -> &VolatileCell<u32> {
        // Safety: `Id::ADDRESS` points to a valid register block and every
        // offset used by the driver lies within it and is word aligned.
        unsafe { &*((Id::ADDRESS as *const u8).add(offset) as *const VolatileCell<u32>) }
    }
}

// Safety: Ownership of the peripheral is established by `Mmio::new`. Accesses
// are volatile and therefore neither elided nor reordered.
unsafe impl<Id: CanId> Registers for Mmio<Id> {
    fn read(&self, offset: usize) -> u32 {
        self.cell(offset).get()
    }

    fn write(&self, offset: usize, value: u32) {
        self.cell(offset).set(value)
    }
}
