#![no_std]
#![warn(missing_docs)]

//! `flexcan-core` provides a set of essential abstractions that serve as a
//! thin integration layer between the platform independent [`flexcan`] crate
//! and platform specific HAL crates (in documentation also referred to as
//! _target HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective
//! safety prerequisites.
//!
//! [`flexcan`]: <https://docs.rs/crate/flexcan/>

pub use fugit;

/// Trait representing FlexCAN peripheral identity
///
/// Types implementing this trait are expected to be used as marker types
/// that identify a specific instance of the FlexCAN peripheral available on
/// the platform (as there might be more than one). It only conveys *where*
/// the register block is located and how large its message buffer RAM is,
/// not that it can be accessed. The latter is expressed by the
/// [`Dependencies`] trait.
///
/// # Safety
/// - `CanId::ADDRESS` points to the start of a valid FlexCAN register block
/// - `CanId::MESSAGE_BUFFER_WORDS` does not exceed the size of the message
///   buffer RAM implemented by that instance, in 32-bit words
///
/// # Examples
/// ```no_run
/// use flexcan_core::CanId;
///
/// pub enum Can0 {}
///
/// unsafe impl CanId for Can0 {
///     const ADDRESS: *const () = 0x4002_4000 as *const _;
///     const MESSAGE_BUFFER_WORDS: usize = 128;
/// }
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x4002_5000 as *const _;
///     const MESSAGE_BUFFER_WORDS: usize = 64;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register block controlling the peripheral
    const ADDRESS: *const ();
    /// Size of the message buffer RAM in 32-bit words
    const MESSAGE_BUFFER_WORDS: usize;
}

/// Clock feeding the CAN protocol engine
///
/// Mirrors the controller's clock source selection bit. Which physical
/// clock stands behind each variant is platform specific.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// Oscillator clock (`CLKSRC = 0`)
    Oscillator,
    /// Peripheral (bus) clock (`CLKSRC = 1`)
    Peripheral,
}

/// Trait representing FlexCAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of [`CanId`] and release
///   them upon destruction
/// - be constructible only when it is safe and sound to interact with the
///   peripheral (module clock gate enabled, protocol engine clock running,
///   pins muxed to the CAN function)
/// - be a singleton (only a single instance of [`Dependencies`] for a
///   specific [`CanId`] must exist at the same time)
///
/// in order to prevent aliasing and guarantee that the high level
/// abstractions provided by [`flexcan`] are sole owners of the peripheral.
///
/// # Safety
/// While a [`Dependencies`] type instance exists
/// - the module clock gate must stay enabled
/// - the clock selected by [`Dependencies::clock_source`] must not change
/// - CAN related pin modes must not change
/// - the register block must not be safely accessible by the application
///   developer nor accessed in other parts of the target HAL
///
/// # Example
/// ```no_run
/// # struct PeripheralClockGate;
/// # struct Pin<const N: u8>;
/// use flexcan_core::fugit::HertzU32;
/// use flexcan_core::{CanId, ClockSource};
///
/// pub enum Can0 {}
///
/// unsafe impl CanId for Can0 {
///     const ADDRESS: *const () = 0x4002_4000 as *const _;
///     const MESSAGE_BUFFER_WORDS: usize = 128;
/// }
///
/// pub struct Dependencies {
///     // Proof that the module clock gate has been enabled
///     gate: PeripheralClockGate,
///     // Oscillator frequency captured when the clock tree was frozen
///     oscillator: HertzU32,
///     rx: Pin<4>,
///     tx: Pin<5>,
/// }
///
/// unsafe impl flexcan_core::Dependencies<Can0> for Dependencies {
///     fn clock_source(&self) -> ClockSource {
///         ClockSource::Oscillator
///     }
///
///     fn can_clock(&self) -> HertzU32 {
///         self.oscillator
///     }
/// }
/// ```
/// [`flexcan`]: <https://docs.rs/crate/flexcan/>
pub unsafe trait Dependencies<Id: CanId> {
    /// Clock source the target HAL prepared for the protocol engine.
    fn clock_source(&self) -> ClockSource;
    /// Frequency of the clock feeding the protocol engine.
    ///
    /// All bit timing calculations are derived from this value, so it has
    /// to be exact.
    fn can_clock(&self) -> fugit::HertzU32;
}
