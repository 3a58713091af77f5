use crate::bus::{Error, FrameError};
use crate::interrupt::BufferSet;
use crate::message::control::{Code, ControlStatus, IdWord};
use crate::message::Frame;
use crate::messageram::{Layout, Slot};
use crate::reg::{self, Registers};
use core::marker::PhantomData;

/// Outcome of [`Tx::cancel`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cancellation {
    /// The pending frame was withdrawn before it was sent
    Aborted,
    /// The frame had already been sent; its completion flag is left set
    Transmitted,
    /// Nothing was pending
    Idle,
}

/// Message buffers with [`Role::Transmit`] on peripheral `Id`
///
/// [`Role::Transmit`]: crate::messageram::Role::Transmit
pub struct Tx<Id, R> {
    regs: R,
    layout: Layout,
    buffers: BufferSet,
    fd: bool,
    bit_rate_switching: bool,
    _markers: PhantomData<Id>,
}

impl<Id: flexcan_core::CanId, R: Registers> Tx<Id, R> {
    /// # Safety
    /// The caller must be the owner or the peripheral referenced by `Id`. The
    /// constructed type assumes ownership of the message buffers in
    /// `buffers`. Do not keep multiple instances for the same peripheral.
    pub(crate) unsafe fn new(
        regs: R,
        layout: Layout,
        buffers: BufferSet,
        fd: bool,
        bit_rate_switching: bool,
    ) -> Self {
        Self {
            regs,
            layout,
            buffers,
            fd,
            bit_rate_switching,
            _markers: PhantomData,
        }
    }

    /// Buffers owned by this instance
    pub fn buffers(&self) -> BufferSet {
        self.buffers
    }

    fn slot(&self, index: usize) -> Result<Slot<'_, R>, Error> {
        let slot = self.layout.slot(&self.regs, index)?;
        if self.buffers.contains(index) {
            Ok(slot)
        } else {
            Err(Error::WrongRole)
        }
    }

    fn flag(&self, index: usize) -> bool {
        self.regs.read(reg::IFLAG1) & (1 << index) != 0
    }

    /// The controller still owns the buffer: a frame is armed, or an abort
    /// was requested and its outcome has not been flagged yet.
    fn is_owned_by_controller(&self, index: usize, control: ControlStatus) -> bool {
        match control.code() {
            code if code.is_tx_pending() => true,
            Code::TX_ABORT => !self.flag(index),
            _ => false,
        }
    }

    /// `true` unless buffer `index` holds a frame waiting to be sent or an
    /// abort still in progress
    pub fn is_idle(&self, index: usize) -> Result<bool, Error> {
        let control = ControlStatus::from(self.slot(index)?.control());
        Ok(!self.is_owned_by_controller(index, control))
    }

    /// Transmit buffers that accept a new frame
    pub fn idle_buffers(&self) -> BufferSet {
        self.buffers
            .iter()
            .filter(|&index| self.is_idle(index).unwrap_or(false))
            .collect()
    }

    fn validate(&self, frame: &Frame) -> Result<(), FrameError> {
        if frame.fd_format() && !self.fd {
            return Err(FrameError::FdDisabled);
        }
        if frame.bit_rate_switching() && !self.bit_rate_switching {
            return Err(FrameError::BitRateSwitchingDisabled);
        }
        let capacity = self.layout.payload().bytes();
        if !frame.is_remote_frame() && frame.len() > capacity {
            return Err(FrameError::PayloadTooLarge {
                len: frame.len(),
                capacity,
            });
        }
        Ok(())
    }

    /// Puts `frame` into buffer `index` and requests its transmission.
    ///
    /// Fails with [`Error::BufferBusy`] while a previous frame is pending or
    /// its cancellation has not completed; a pending frame is never replaced.
    pub fn transmit(&mut self, index: usize, frame: &Frame) -> Result<(), Error> {
        let slot = self.slot(index)?;
        self.validate(frame)?;
        if self.is_owned_by_controller(index, ControlStatus::from(slot.control())) {
            return Err(Error::BufferBusy);
        }

        // A stale completion flag would be mistaken for this frame's
        self.regs.write(reg::IFLAG1, 1 << index);
        if !frame.is_remote_frame() {
            slot.write_payload(&frame.data, frame.len());
        }
        slot.set_id(IdWord::new(frame.id()).into());

        // The control word goes last; writing the code starts arbitration
        let mut control = ControlStatus::with_code(Code::TX_DATA);
        control.set_edl(frame.fd_format());
        control.set_brs(frame.bit_rate_switching());
        control.set_esi(frame.is_transmitter_error_passive());
        control.set_srr(true);
        control.set_ide(frame.is_extended());
        control.set_rtr(frame.is_remote_frame());
        control.set_dlc(frame.dlc());
        slot.set_control(control.into());
        Ok(())
    }

    /// Requests cancellation of the frame in buffer `index`.
    ///
    /// Returns [`nb::Error::WouldBlock`] until the controller reports the
    /// outcome. A frame that already won arbitration is still sent, which is
    /// reported as [`Cancellation::Transmitted`].
    pub fn cancel(&mut self, index: usize) -> nb::Result<Cancellation, Error> {
        let slot = self.slot(index)?;
        let flagged = self.flag(index);
        let control = ControlStatus::from(slot.control());
        match control.code() {
            code if code.is_tx_pending() => {
                let mut request = control;
                request.set_code(Code::TX_ABORT);
                slot.set_control(request.into());
                Err(nb::Error::WouldBlock)
            }
            Code::TX_ABORT if flagged => {
                self.regs.write(reg::IFLAG1, 1 << index);
                slot.set_control(ControlStatus::with_code(Code::TX_INACTIVE).into());
                Ok(Cancellation::Aborted)
            }
            Code::TX_ABORT => Err(nb::Error::WouldBlock),
            _ if flagged => Ok(Cancellation::Transmitted),
            _ => Ok(Cancellation::Idle),
        }
    }

    /// Returns the set of transmit buffers whose frame was sent. The flags
    /// are cleared by [`Self::clear_transmission_completed_flags`] or when a
    /// new transmission is requested for the buffer.
    pub fn transmission_completed_flags(&self) -> BufferSet {
        BufferSet(self.regs.read(reg::IFLAG1) & self.buffers.0)
    }

    /// Clears the completion flags of `to_be_cleared`. Flags of buffers not
    /// owned by this instance remain unchanged.
    pub fn clear_transmission_completed_flags(&mut self, to_be_cleared: BufferSet) {
        let flags = to_be_cleared.intersection(self.buffers).0;
        if flags != 0 {
            self.regs.write(reg::IFLAG1, flags);
        }
    }
}
