//! Controller lifecycle
//!
//! The controller is either disabled, frozen for configuration or
//! operating on the bus. [`CanConfigurable`] represents the frozen
//! controller, [`Can`] the operating one; the transitions between them are
//! the only places where the driver waits for the hardware, and every such
//! wait is bounded by [`CanConfig::timeout_iterations`].

use crate::config::{BitTimingConfig, BitTimingError, CanConfig, DataPhase, Mode};
use crate::filter::FilterBank;
use crate::interrupt::BufferSet;
use crate::message::control::{Code, ControlStatus, IdWord};
use crate::message::Frame;
use crate::messageram::{self, BufferAssignment, Layout, PayloadSize, Role};
use crate::reg::{self, Cbt, Ctrl1, Ctrl2, Ecr, Esr1, Fdcbt, Fdctrl, Mcr, Mmio, Registers};
use crate::rx_buffers::RxBuffers;
use crate::tx_buffers::Tx;
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use embedded_can::Id as FrameId;
use flexcan_core::{CanId, ClockSource, Dependencies};
use fugit::HertzU32;

/// Printable ESR1 register
pub struct ProtocolStatus(pub Esr1);

impl From<Esr1> for ProtocolStatus {
    fn from(value: Esr1) -> Self {
        Self(value)
    }
}

impl ProtocolStatus {
    /// Fault confinement state of the node
    pub fn fault_confinement(&self) -> FaultConfinement {
        match self.0.fltconf() {
            0 => FaultConfinement::ErrorActive,
            1 => FaultConfinement::ErrorPassive,
            _ => FaultConfinement::BusOff,
        }
    }
}

impl Debug for ProtocolStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        let esr1 = &self.0;

        f.debug_struct("ProtocolStatus")
            .field("fault_confinement", &self.fault_confinement())
            .field("synch", &esr1.synch())
            .field("idle", &esr1.idle())
            .field("tx", &esr1.tx())
            .field("rx", &esr1.rx())
            .field("txwrn", &esr1.txwrn())
            .field("rxwrn", &esr1.rxwrn())
            .field("bit1err", &esr1.bit1err())
            .field("bit0err", &esr1.bit0err())
            .field("ackerr", &esr1.ackerr())
            .field("crcerr", &esr1.crcerr())
            .field("frmerr", &esr1.frmerr())
            .field("stferr", &esr1.stferr())
            .field("errovr", &esr1.errovr())
            .finish()
    }
}

/// Fault confinement state, see ISO 11898-1
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultConfinement {
    /// Error counters below 128
    ErrorActive,
    /// An error counter reached 128
    ErrorPassive,
    /// The transmit error counter exceeded 255
    BusOff,
}

/// Content of the ECR register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// Transmit error counter
    pub transmit: u8,
    /// Receive error counter
    pub receive: u8,
    /// Transmit error counter for errors in the fast data phase
    pub transmit_fast: u8,
    /// Receive error counter for errors in the fast data phase
    pub receive_fast: u8,
}

impl From<Ecr> for ErrorCounters {
    fn from(value: Ecr) -> Self {
        Self {
            transmit: value.txerrcnt(),
            receive: value.rxerrcnt(),
            transmit_fast: value.txerrcnt_fast(),
            receive_fast: value.rxerrcnt_fast(),
        }
    }
}

/// Errors that may occur during configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigurationError {
    /// Problems with the nominal bit timing configuration
    NominalBitTiming(BitTimingError),
    /// Problems with the data phase bit timing configuration
    DataBitTiming(BitTimingError),
    /// Payloads above 8 bytes need [`Mode::Fd`]
    PayloadRequiresFd(PayloadSize),
    /// A role is assigned to a buffer that the RAM layout cannot hold
    BufferOutOfRange {
        /// Offending buffer
        index: usize,
        /// Number of buffers of the configured payload size
        available: usize,
    },
    /// An individual mask is set for a buffer that does not receive
    MaskWithoutReceiveBuffer {
        /// Offending buffer
        index: usize,
    },
    /// Transceiver delay compensation offset is not in the range [0, 31]
    TransceiverDelayCompensationOutOfRange(u8),
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::NominalBitTiming(value)
    }
}

/// Acknowledge the driver waits for while switching modes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Acknowledge {
    /// LPMACK set after disabling the module
    LowPowerEntry,
    /// LPMACK cleared after enabling the module
    LowPowerExit,
    /// FRZACK set after requesting freeze mode
    FreezeEntry,
    /// FRZACK cleared after leaving freeze mode
    FreezeExit,
    /// NOTRDY cleared, the controller takes part in bus traffic
    Ready,
}

/// Frame that the current configuration cannot carry
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// FD frame while the controller runs in [`Mode::Classic`]
    FdDisabled,
    /// Bit rate switched frame while switching is not allowed
    BitRateSwitchingDisabled,
    /// Payload longer than the configured message buffer payload
    PayloadTooLarge {
        /// Length of the frame's data field
        len: usize,
        /// Payload capacity of the message buffers
        capacity: usize,
    },
}

/// Index is out of bounds
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfBounds;

/// Errors of the bus operations
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The configuration was rejected, nothing was committed
    Configuration(ConfigurationError),
    /// The controller did not acknowledge a mode switch in time
    HardwareTimeout(Acknowledge),
    /// The transmit buffer still holds a pending frame
    BufferBusy,
    /// The index does not name a message buffer of the current layout
    OutOfBounds,
    /// The buffer is assigned a role that does not support the operation
    WrongRole,
    /// The frame does not fit the configuration
    InvalidFrame(FrameError),
}

impl From<ConfigurationError> for Error {
    fn from(value: ConfigurationError) -> Self {
        Self::Configuration(value)
    }
}

impl From<OutOfBounds> for Error {
    fn from(_: OutOfBounds) -> Self {
        Self::OutOfBounds
    }
}

impl From<FrameError> for Error {
    fn from(value: FrameError) -> Self {
        Self::InvalidFrame(value)
    }
}

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        embedded_can::ErrorKind::Other
    }
}

/// Operating state of the controller as reported by its acknowledge bits
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerState {
    /// Module disabled, clocks gated inside the controller
    Disabled,
    /// Frozen; configuration registers are writable, no bus traffic
    FreezeConfig,
    /// Taking part in bus traffic
    NormalOperation,
}

impl From<Mcr> for ControllerState {
    fn from(mcr: Mcr) -> Self {
        if mcr.lpmack() {
            Self::Disabled
        } else if mcr.frzack() {
            Self::FreezeConfig
        } else {
            Self::NormalOperation
        }
    }
}

/// Polls `pending` until it returns `false`, at most `timeout_iterations`
/// times.
pub(crate) fn checked_wait(
    mut pending: impl FnMut() -> bool,
    timeout_iterations: u32,
    acknowledge: Acknowledge,
) -> Result<(), Error> {
    let mut elapsed = 0;
    while pending() {
        elapsed += 1;
        if elapsed >= timeout_iterations {
            #[cfg(feature = "defmt")]
            defmt::warn!("flexcan: no acknowledge ({}) in time", acknowledge);
            return Err(Error::HardwareTimeout(acknowledge));
        }
    }
    Ok(())
}

/// Common CANbus functionality
pub trait CanBus {
    /// Read error counters
    fn error_counters(&self) -> ErrorCounters;
    /// Read additional status information
    fn protocol_status(&self) -> ProtocolStatus;
    /// Get current value of the free running timer
    ///
    /// Reading the timer releases any receive buffer that is still locked.
    fn timer(&self) -> u16;
    /// Operating state of the controller
    fn state(&self) -> ControllerState;
}

/// Settings derived from [`CanConfig`] when it is committed
struct Committed {
    nominal: BitTimingConfig,
    data: Option<DataPhase>,
    layout: Layout,
}

/// Register access, dependencies and the configuration shared by both
/// lifecycle states
pub struct Internals<Id, D, R> {
    regs: R,
    dependencies: D,
    config: CanConfig,
    buffers: BufferAssignment,
    filters: FilterBank,
    layout: Layout,
    _id: PhantomData<Id>,
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers + Clone> Internals<Id, D, R> {
    fn wait(&self, pending: impl Fn(Mcr) -> bool, acknowledge: Acknowledge) -> Result<(), Error> {
        checked_wait(
            || pending(self.regs.get::<Mcr>()),
            self.config.timeout_iterations,
            acknowledge,
        )
    }

    /// Leaves the disabled state with the clock source requested by the
    /// dependencies and freezes the controller.
    fn power_up(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::debug!("flexcan: enabling module");
        // The clock source may only change while the module is disabled
        self.regs.modify::<Mcr>(|w| w.set_mdis(true));
        self.wait(|mcr| !mcr.lpmack(), Acknowledge::LowPowerEntry)?;
        let peripheral_clock = self.dependencies.clock_source() == ClockSource::Peripheral;
        self.regs.modify::<Ctrl1>(|w| w.set_clksrc(peripheral_clock));
        self.regs.modify::<Mcr>(|w| w.set_mdis(false));
        self.wait(|mcr| mcr.lpmack(), Acknowledge::LowPowerExit)?;
        self.freeze()
    }

    /// Requests freeze mode and clears all message buffers once it is
    /// acknowledged.
    fn freeze(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::debug!("flexcan: entering freeze mode");
        self.regs.modify::<Mcr>(|w| {
            w.set_frz(true);
            w.set_halt(true);
        });
        self.wait(|mcr| !mcr.frzack(), Acknowledge::FreezeEntry)?;
        self.reset_message_buffers();
        Ok(())
    }

    /// Leaves freeze mode and waits until the controller is synchronized to
    /// the bus.
    fn unfreeze(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        defmt::debug!("flexcan: leaving freeze mode");
        self.regs.modify::<Mcr>(|w| {
            w.set_frz(false);
            w.set_halt(false);
        });
        self.wait(|mcr| mcr.frzack(), Acknowledge::FreezeExit)?;
        self.wait(|mcr| mcr.notrdy(), Acknowledge::Ready)
    }

    /// Zeroes the message buffer RAM and the individual masks, masks all
    /// buffer interrupts and clears all buffer flags.
    fn reset_message_buffers(&self) {
        messageram::zero(&self.regs, Id::MESSAGE_BUFFER_WORDS);
        let buffers = Layout::new(Id::MESSAGE_BUFFER_WORDS, PayloadSize::Bytes8).buffers();
        for index in 0..buffers {
            self.regs.write(reg::rximr(index), 0);
        }
        self.regs.write(reg::IMASK1, 0);
        self.regs.write(reg::IFLAG1, u32::MAX);
    }

    /// Checks the configuration without touching the hardware
    fn validate(&self) -> Result<Committed, ConfigurationError> {
        let can_clock = self.dependencies.can_clock();
        let config = &self.config;

        let nominal = BitTimingConfig::nominal(can_clock, &config.nominal_timing)?;
        let data = match config.mode {
            Mode::Classic => {
                if config.payload != PayloadSize::Bytes8 {
                    return Err(ConfigurationError::PayloadRequiresFd(config.payload));
                }
                None
            }
            Mode::Fd {
                allow_bit_rate_switching,
                data_phase_timing,
                transceiver_delay_compensation,
            } => {
                let timing = BitTimingConfig::data_phase(can_clock, &data_phase_timing)
                    .map_err(ConfigurationError::DataBitTiming)?;
                if let Some(offset) = transceiver_delay_compensation.filter(|o| *o > 31) {
                    return Err(ConfigurationError::TransceiverDelayCompensationOutOfRange(
                        offset,
                    ));
                }
                Some(DataPhase {
                    timing,
                    bit_rate_switching: allow_bit_rate_switching,
                    transceiver_delay_compensation,
                })
            }
        };

        let layout = Layout::new(Id::MESSAGE_BUFFER_WORDS, config.payload);
        if let Some((index, _)) = self
            .buffers
            .iter()
            .find(|(index, _)| *index >= layout.buffers())
        {
            return Err(ConfigurationError::BufferOutOfRange {
                index,
                available: layout.buffers(),
            });
        }
        let stray_masks = self.filters.individual_set() & !self.buffers.receive_set();
        if stray_masks != 0 {
            return Err(ConfigurationError::MaskWithoutReceiveBuffer {
                index: stray_masks.trailing_zeros() as usize,
            });
        }

        Ok(Committed {
            nominal,
            data,
            layout,
        })
    }

    /// Writes a validated configuration into the frozen controller
    fn apply(&mut self, committed: &Committed) {
        let regs = &self.regs;
        let config = &self.config;
        let fd = committed.data.is_some();

        regs.modify::<Ctrl1>(|w| {
            w.set_lpb(config.loopback);
            w.set_lom(config.listen_only);
            // Triple sampling is not available with CAN FD
            w.set_smp(config.triple_sampling && !fd);
        });

        let nominal = &committed.nominal;
        let mut cbt = Cbt::from(0);
        cbt.set_btf(true);
        cbt.set_epresdiv(nominal.prescaler);
        cbt.set_erjw(nominal.resync_jump_width - 1);
        cbt.set_epropseg(nominal.propagation_segment - 1);
        cbt.set_epseg1(nominal.phase_segment_1 - 1);
        cbt.set_epseg2(nominal.phase_segment_2 - 1);
        regs.set(cbt);

        let mut fdctrl = Fdctrl::from(0);
        if let Some(data) = &committed.data {
            let timing = &data.timing;
            let mut fdcbt = Fdcbt::from(0);
            fdcbt.set_fpresdiv(timing.prescaler);
            fdcbt.set_frjw(timing.resync_jump_width - 1);
            fdcbt.set_fpropseg(timing.propagation_segment);
            fdcbt.set_fpseg1(timing.phase_segment_1 - 1);
            fdcbt.set_fpseg2(timing.phase_segment_2 - 1);
            regs.set(fdcbt);

            fdctrl.set_fdrate(data.bit_rate_switching);
            for region in 0..committed.layout.blocks() {
                fdctrl.set_region_data_size(region, committed.layout.payload().reg());
            }
            fdctrl.set_tdcen(data.transceiver_delay_compensation.is_some());
            fdctrl.set_tdcoff(data.transceiver_delay_compensation.unwrap_or(0));
        }
        regs.set(fdctrl);
        regs.modify::<Ctrl2>(|w| w.set_isocanfden(fd));

        regs.modify::<Mcr>(|w| {
            w.set_rfen(false);
            w.set_irmq(true);
            w.set_aen(true);
            w.set_fden(fd);
            w.set_srxdis(!config.self_reception);
            w.set_maxmb(committed.layout.buffers().saturating_sub(1) as u8);
        });

        self.reset_message_buffers();
        regs.write(reg::RXMGMASK, self.filters.global().raw());
        for index in 0..committed.layout.buffers() {
            regs.write(reg::rximr(index), self.filters.effective(index).raw());
        }

        for (index, role) in self.buffers.iter() {
            let Ok(slot) = committed.layout.slot(regs, index) else {
                continue;
            };
            match role {
                Role::Receive { id } => {
                    slot.set_id(IdWord::new(id).into());
                    let extended = matches!(id, FrameId::Extended(_));
                    slot.set_control(receive_arming_word(extended, fd).into());
                }
                Role::Transmit => {
                    slot.set_control(ControlStatus::with_code(Code::TX_INACTIVE).into());
                }
                Role::Inactive => {}
            }
        }
        self.layout = committed.layout;
    }
}

/// Control word that hands an empty receive buffer to the controller
pub(crate) fn receive_arming_word(extended: bool, fd: bool) -> ControlStatus {
    let mut word = ControlStatus::with_code(Code::RX_EMPTY);
    word.set_ide(extended);
    word.set_edl(fd);
    word.set_brs(fd);
    word
}

/// A CAN bus that is taking part in bus traffic. Timing, masks and buffer
/// roles are fixed until the bus is [`Self::reconfigure`]d.
pub struct Can<Id, D, R = Mmio<Id>> {
    /// Receive buffers
    pub rx: RxBuffers<Id, R>,
    /// Transmit buffers
    pub tx: Tx<Id, R>,
    /// Implementation details. The field is public to allow destructuring.
    pub internals: Internals<Id, D, R>,
}

/// A CAN bus in configuration mode. Before messages can be sent and received,
/// it needs to be [`Self::finalize`]d.
pub struct CanConfigurable<Id, D, R = Mmio<Id>>(
    /// The controller is frozen while this is wrapped.
    Internals<Id, D, R>,
);

impl<Id, D, R> Debug for CanConfigurable<Id, D, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanConfigurable").finish_non_exhaustive()
    }
}

impl<Id, D, R> Debug for Can<Id, D, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Can")
            .field("layout", &self.internals.layout)
            .finish_non_exhaustive()
    }
}

impl<Id: CanId, D: Dependencies<Id>> CanConfigurable<Id, D> {
    /// Create new can peripheral.
    ///
    /// The controller is enabled with the clock source chosen by
    /// `dependencies` and frozen. The returned peripheral is not
    /// operational; use [`Self::finalize`] to finish configuration and start
    /// transmitting and receiving.
    pub fn new(bitrate: HertzU32, dependencies: D) -> Result<Self, (Error, D)> {
        // Safety:
        // Since `dependencies` field implies ownership of the HW register pointed to by
        // `Id: CanId`, the register block has a unique owner
        let regs = unsafe { Mmio::<Id>::new() };
        Self::with_registers(regs, CanConfig::new(bitrate), dependencies)
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers + Clone> CanConfigurable<Id, D, R> {
    /// Create new can peripheral operating through `registers`.
    ///
    /// On failure the dependencies are handed back, the controller is left
    /// in whatever state it reached.
    pub fn with_registers(
        registers: R,
        config: CanConfig,
        dependencies: D,
    ) -> Result<Self, (Error, D)> {
        let mut internals = Internals {
            regs: registers,
            dependencies,
            config,
            buffers: BufferAssignment::default(),
            filters: FilterBank::default(),
            layout: Layout::new(Id::MESSAGE_BUFFER_WORDS, PayloadSize::Bytes8),
            _id: PhantomData,
        };
        match internals.power_up() {
            Ok(()) => Ok(Self(internals)),
            Err(error) => Err((error, internals.dependencies)),
        }
    }

    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.0.regs
    }

    /// Allows changing the bus configuration
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.0.config
    }

    /// Allows assigning roles to message buffers
    pub fn buffers(&mut self) -> &mut BufferAssignment {
        &mut self.0.buffers
    }

    /// Allows reconfiguring the acceptance masks
    pub fn filters(&mut self) -> &mut FilterBank {
        &mut self.0.filters
    }

    /// Operating state of the controller
    pub fn state(&self) -> ControllerState {
        self.0.regs.get::<Mcr>().into()
    }

    /// Locks the configuration and enters normal operation.
    ///
    /// On failure the configurable bus is handed back. A rejected
    /// configuration leaves the hardware untouched; after a timeout the
    /// controller may have left freeze mode.
    pub fn finalize(mut self) -> Result<Can<Id, D, R>, (Error, Self)> {
        let committed = match self.0.validate() {
            Ok(committed) => committed,
            Err(error) => return Err((error.into(), self)),
        };
        self.0.apply(&committed);
        if let Err(error) = self.0.unfreeze() {
            return Err((error, self));
        }

        let internals = self.0;
        let fd = committed.data.is_some();
        let bit_rate_switching = committed
            .data
            .map_or(false, |data| data.bit_rate_switching);
        Ok(Can {
            // Safety: Every component only touches the words of its own buffers and clears
            // flags through single bit writes; the remaining registers stay with `internals`.
            rx: unsafe {
                RxBuffers::new(
                    internals.regs.clone(),
                    committed.layout,
                    BufferSet(internals.buffers.receive_set()),
                    fd,
                )
            },
            tx: unsafe {
                Tx::new(
                    internals.regs.clone(),
                    committed.layout,
                    BufferSet(internals.buffers.transmit_set()),
                    fd,
                    bit_rate_switching,
                )
            },
            internals,
        })
    }

    /// Disables the controller and returns its dependencies
    pub fn release(self) -> D {
        self.0.regs.modify::<Mcr>(|w| w.set_mdis(true));
        self.0.dependencies
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers + Clone> Can<Id, D, R> {
    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.internals.regs
    }

    /// Puts `frame` into transmit buffer `index`; see [`Tx::transmit`]
    ///
    /// This shadows [`embedded_can::nb::Can::transmit`], which picks the
    /// buffer itself.
    pub fn transmit(&mut self, index: usize, frame: &Frame) -> Result<(), Error> {
        self.tx.transmit(index, frame)
    }

    /// Takes a frame out of receive buffer `index`; see
    /// [`RxBuffers::try_receive`]
    pub fn try_receive(&mut self, index: usize) -> Result<Option<Frame>, Error> {
        self.rx.try_receive(index)
    }

    /// Buffers with a raised flag: receive buffers holding a frame and
    /// transmit buffers that completed or aborted a transmission
    pub fn poll_flags(&self) -> BufferSet {
        let owned = self.rx.buffers().0 | self.tx.buffers().0;
        BufferSet(self.internals.regs.read(reg::IFLAG1) & owned)
    }

    /// Allow the message buffer interrupt to be triggered by the flags of
    /// `to_be_enabled`. Interrupts for other buffers remain unchanged.
    pub fn enable_interrupts(&mut self, to_be_enabled: BufferSet) {
        let regs = &self.internals.regs;
        regs.write(reg::IMASK1, regs.read(reg::IMASK1) | to_be_enabled.0);
    }

    /// Disallow the message buffer interrupt to be triggered by the flags of
    /// `to_be_disabled`. Interrupts for other buffers remain unchanged.
    pub fn disable_interrupts(&mut self, to_be_disabled: BufferSet) {
        let regs = &self.internals.regs;
        regs.write(reg::IMASK1, regs.read(reg::IMASK1) & !to_be_disabled.0);
    }

    /// Buffers allowed to trigger the message buffer interrupt
    pub fn enabled_interrupts(&self) -> BufferSet {
        BufferSet(self.internals.regs.read(reg::IMASK1))
    }

    /// Stops bus traffic and returns to configuration mode.
    ///
    /// All message buffers are cleared; the configuration, role table and
    /// masks are kept and committed again by [`CanConfigurable::finalize`].
    pub fn reconfigure(self) -> Result<CanConfigurable<Id, D, R>, (Error, Self)> {
        let Self {
            rx,
            tx,
            mut internals,
        } = self;
        match internals.freeze() {
            Ok(()) => Ok(CanConfigurable(internals)),
            Err(error) => Err((error, Self { rx, tx, internals })),
        }
    }

    /// Disables the controller and returns its dependencies
    pub fn release(self) -> D {
        #[cfg(feature = "defmt")]
        defmt::debug!("flexcan: disabling module");
        self.internals.regs.modify::<Mcr>(|w| w.set_mdis(true));
        self.internals.dependencies
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers + Clone> CanBus for Can<Id, D, R> {
    fn error_counters(&self) -> ErrorCounters {
        self.internals.regs.get::<Ecr>().into()
    }

    fn protocol_status(&self) -> ProtocolStatus {
        self.internals.regs.get::<Esr1>().into()
    }

    fn timer(&self) -> u16 {
        self.internals.regs.read(reg::TIMER) as u16
    }

    fn state(&self) -> ControllerState {
        self.internals.regs.get::<Mcr>().into()
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers + Clone> embedded_can::nb::Can
    for Can<Id, D, R>
{
    type Frame = Frame;
    type Error = Error;

    /// Puts `frame` into the lowest idle transmit buffer. Never replaces a
    /// pending frame.
    fn transmit(&mut self, frame: &Frame) -> nb::Result<Option<Frame>, Error> {
        let Some(index) = self.tx.idle_buffers().iter().next() else {
            return Err(nb::Error::WouldBlock);
        };
        self.tx.transmit(index, frame)?;
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<Frame, Error> {
        self.rx.receive_any()?.ok_or(nb::Error::WouldBlock)
    }
}

impl<Id: CanId, D: Dependencies<Id>, R> Internals<Id, D, R> {
    /// Frequency of the protocol engine clock
    pub fn can_clock(&self) -> HertzU32 {
        self.dependencies.can_clock()
    }

    /// Layout of the message buffer RAM
    pub fn layout(&self) -> Layout {
        self.layout
    }
}
