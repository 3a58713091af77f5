#![no_std]
#![warn(missing_docs)]
//! # FlexCAN
//!
//! ## Overview
//! This crate provides a platform-agnostic CAN HAL for the FlexCAN
//! controller with CAN FD support.
//!
//! It provides the following features:
//!
//! - classical CAN and CAN FD with bitrate switching support
//! - bit timing derived from the protocol engine clock and a bitrate target
//! - message buffer RAM layout for 8, 16, 32 and 64 byte payloads
//! - message transmission using dedicated message buffers
//! - message transmission cancellation
//! - message reception using dedicated message buffers with acceptance masks
//! - per-buffer flags and interrupt masks
//!
//! FlexCAN is embedded in the MCU like all other peripherals. The interface
//! between them is a clock, a message buffer interrupt line and a single
//! memory-mapped register block that also hosts the message buffer RAM.
//!
//! For the FlexCAN abstractions to be considered operational, this interface
//! has to be properly configured. The latter is assured through the safety
//! requirements of [`flexcan_core`] traits which platform-specific HALs are
//! expected to implement.
//!
//! In order to use FlexCAN, one has to instantiate [`CanConfigurable`] and
//! [`finalize`] it. Its constructor requires an instance of an
//! [`Dependencies`] implementing struct and holds onto it until it's
//! [`released`]. Safety requirements of the `Dependencies` trait
//! guarantee a correct state of FlexCAN interfaces during its operation.
//!
//! ## Mode transitions
//!
//! Configuration registers and the message buffer RAM can only be written
//! while the controller is frozen. Every transition waits for an acknowledge
//! bit of the controller; the number of polls is bounded by
//! [`CanConfig::timeout_iterations`] and exceeding it yields
//! [`Error::HardwareTimeout`].
//!
//! ## General usage example
//!
//! ```no_run
//! # use fugit::RateExtU32 as _;
//! # struct Can0;
//! # unsafe impl flexcan::core::CanId for Can0 {
//! #     const ADDRESS: *const () = 0x4002_4000 as *const _;
//! #     const MESSAGE_BUFFER_WORDS: usize = 128;
//! # }
//! # pub mod hal {
//! #     pub mod can {
//! #         #[derive(Debug)]
//! #         pub struct Dependencies(());
//! #         unsafe impl<ID: flexcan::core::CanId> flexcan::core::Dependencies<ID> for Dependencies {
//! #             fn clock_source(&self) -> flexcan::core::ClockSource { unreachable!() }
//! #             fn can_clock(&self) -> fugit::HertzU32 { unreachable!() }
//! #         }
//! #         impl Dependencies {
//! #             pub fn new() -> Result<Dependencies, ()> {
//! #                 Ok(Dependencies(()))
//! #             }
//! #         }
//! #     }
//! # }
//! use flexcan::config::{BitTiming, Mode};
//! use flexcan::embedded_can as ecan;
//! use flexcan::filter::Mask;
//! use flexcan::interrupt::BufferSet;
//! use flexcan::message::tx::{FrameType, MessageBuilder};
//! use flexcan::messageram::PayloadSize;
//!
//! let dependencies = hal::can::Dependencies::new(/* all required parameters */).unwrap();
//! let mut can =
//!     flexcan::bus::CanConfigurable::<Can0, _>::new(500.kHz(), dependencies).unwrap();
//!
//! // FlexCAN is frozen and user can access and modify the underlying config
//! // struct. More information can be found in `flexcan::config` module.
//! can.config().mode = Mode::Fd {
//!     allow_bit_rate_switching: true,
//!     data_phase_timing: BitTiming::new(2.MHz()),
//!     transceiver_delay_compensation: Some(16),
//! };
//! can.config().payload = PayloadSize::Bytes64;
//!
//! // Buffer 0 receives every standard identifier, buffer 1 transmits
//! can.buffers()
//!     .receive(0, ecan::StandardId::ZERO)
//!     .unwrap();
//! can.buffers().transmit(1).unwrap();
//! can.filters().set(0, Mask::ACCEPT_ALL).unwrap();
//!
//! // Call to `finalize` puts FlexCAN into operational mode
//! let mut can = can.finalize().unwrap();
//! can.enable_interrupts(BufferSet::from_iter([0]));
//!
//! let frame = MessageBuilder {
//!     id: ecan::StandardId::new(0x123).unwrap().into(),
//!     frame_type: FrameType::FlexibleDatarate {
//!         payload: &[0xA5; 20],
//!         bit_rate_switching: true,
//!         force_error_state_indicator: false,
//!     },
//! }
//! .build()
//! .unwrap();
//! can.transmit(1, &frame).unwrap();
//!
//! if let Some(frame) = can.try_receive(0).unwrap() {
//!     // ...
//! #   let _ = frame;
//! }
//! ```
//!
//! [`CanConfigurable`]: crate::bus::CanConfigurable
//! [`finalize`]: crate::bus::CanConfigurable::finalize
//! [`released`]: crate::bus::Can::release
//! [`Dependencies`]: flexcan_core::Dependencies
//! [`CanConfig::timeout_iterations`]: crate::config::CanConfig::timeout_iterations
//! [`Error::HardwareTimeout`]: crate::bus::Error::HardwareTimeout

pub mod bus;
pub mod config;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod messageram;
pub mod prelude;
pub mod reg;
pub mod rx_buffers;
pub mod tx_buffers;

pub use embedded_can;
pub use flexcan_core as core;
