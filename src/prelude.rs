//! Traits needed to use the driver without naming them
pub use crate::bus::CanBus as _;
pub use embedded_can::nb::Can as _;
pub use embedded_can::Frame as _;
