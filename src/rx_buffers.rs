use crate::bus::{receive_arming_word, Error};
use crate::interrupt::BufferSet;
use crate::message::control::{Code, ControlStatus, IdWord};
use crate::message::{dlc_to_len, Frame, MAX_PAYLOAD};
use crate::messageram::Layout;
use crate::reg::{self, Registers};
use core::marker::PhantomData;

/// Message buffers with [`Role::Receive`] on peripheral `Id`
///
/// [`Role::Receive`]: crate::messageram::Role::Receive
pub struct RxBuffers<Id, R> {
    regs: R,
    layout: Layout,
    buffers: BufferSet,
    fd: bool,
    _markers: PhantomData<Id>,
}

impl<Id: flexcan_core::CanId, R: Registers> RxBuffers<Id, R> {
    /// # Safety
    /// The caller must be the owner or the peripheral referenced by `Id`. The
    /// constructed type assumes ownership of the message buffers in
    /// `buffers`. Do not keep multiple instances for the same peripheral.
    pub(crate) unsafe fn new(regs: R, layout: Layout, buffers: BufferSet, fd: bool) -> Self {
        Self {
            regs,
            layout,
            buffers,
            fd,
            _markers: PhantomData,
        }
    }

    /// Buffers owned by this instance
    pub fn buffers(&self) -> BufferSet {
        self.buffers
    }

    /// Receive buffers currently holding a frame
    pub fn flags(&self) -> BufferSet {
        BufferSet(self.regs.read(reg::IFLAG1) & self.buffers.0)
    }

    fn check(&self, index: usize) -> Result<(), Error> {
        if index >= self.layout.buffers() {
            Err(Error::OutOfBounds)
        } else if !self.buffers.contains(index) {
            Err(Error::WrongRole)
        } else {
            Ok(())
        }
    }

    fn has_new_data(&self, index: usize) -> bool {
        self.regs.read(reg::IFLAG1) & (1 << index) != 0
    }

    fn mark_buffer_read(&self, index: usize) {
        // Flags are write-1-to-clear, other buffers' flags stay untouched
        self.regs.write(reg::IFLAG1, 1 << index);
    }

    /// Releases the buffer lock taken by reading a control word
    fn unlock(&self) {
        let _ = self.regs.read(reg::TIMER);
    }

    /// Takes the frame out of buffer `index` and hands the buffer back to
    /// the controller. Returns `Ok(None)` if the buffer holds no frame or is
    /// being updated by the controller right now.
    pub fn try_receive(&mut self, index: usize) -> Result<Option<Frame>, Error> {
        self.check(index)?;
        if !self.has_new_data(index) {
            return Ok(None);
        }
        let slot = self.layout.slot(&self.regs, index)?;

        // Reading the control word locks the buffer against updates
        let control = ControlStatus::from(slot.control());
        let overrun = match control.code() {
            Code::RX_FULL => false,
            Code::RX_OVERRUN => true,
            code => {
                self.unlock();
                if !code.is_busy() {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("flexcan: buffer {} flagged with code {}", index, code);
                    self.mark_buffer_read(index);
                }
                return Ok(None);
            }
        };

        let extended = control.ide();
        let fd_format = control.edl();
        let remote = control.rtr();
        let id = IdWord::from(slot.id()).to_id(extended);
        let mut data = [0; MAX_PAYLOAD];
        if !remote {
            let len = dlc_to_len(control.dlc(), fd_format).min(self.layout.payload().bytes());
            slot.read_payload(&mut data, len);
        }

        slot.set_control(receive_arming_word(extended, self.fd).into());
        self.unlock();
        self.mark_buffer_read(index);

        Ok(Some(Frame {
            id,
            dlc: control.dlc(),
            data,
            remote,
            fd_format,
            bit_rate_switching: control.brs(),
            error_state_indicator: control.esi(),
            timestamp: control.timestamp(),
            overrun,
        }))
    }

    /// Returns a received frame from the selected buffer if available
    pub fn receive(&mut self, index: usize) -> nb::Result<Frame, Error> {
        self.try_receive(index)?.ok_or(nb::Error::WouldBlock)
    }

    /// Returns a received frame from the lowest flagged buffer, if any
    pub fn receive_any(&mut self) -> Result<Option<Frame>, Error> {
        for index in self.flags() {
            if let Some(frame) = self.try_receive(index)? {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}
