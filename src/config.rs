//! CAN bus configuration

use crate::messageram::PayloadSize;
use core::ops::RangeInclusive;
use fugit::HertzU32;

pub use flexcan_core::ClockSource;

/// Number of acknowledge polls allowed per mode transition by default
pub const DEFAULT_TIMEOUT_ITERATIONS: u32 = 100_000;

/// Configuration for the CAN bus
#[derive(Copy, Clone, Debug)]
pub struct CanConfig {
    /// Run peripheral in CAN-FD mode
    pub mode: Mode,
    /// Internal loop back, frames sent are received by the controller itself
    pub loopback: bool,
    /// Only listen to the bus, never drive it (no ACK, no error frames)
    pub listen_only: bool,
    /// Receive frames transmitted by this controller if they match a receive
    /// buffer
    pub self_reception: bool,
    /// Sample every bit three times instead of once. Only applies to the
    /// nominal phase.
    pub triple_sampling: bool,
    /// Bit timing target for everything except the data phase of bit rate
    /// switched FD frames.
    pub nominal_timing: BitTiming,
    /// Payload capacity of every message buffer
    ///
    /// Anything above [`PayloadSize::Bytes8`] requires [`Mode::Fd`].
    pub payload: PayloadSize,
    /// Upper bound on polls of an acknowledge bit while switching modes
    pub timeout_iterations: u32,
}

impl CanConfig {
    /// Create an instance
    ///
    /// Nominal bitrate value must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            mode: Default::default(),
            loopback: false,
            listen_only: false,
            self_reception: true,
            triple_sampling: false,
            nominal_timing: BitTiming::new(bitrate),
            payload: PayloadSize::Bytes8,
            timeout_iterations: DEFAULT_TIMEOUT_ITERATIONS,
        }
    }
}

/// Enable/disable CAN-FD and related features
#[derive(Default, Copy, Clone, Debug)]
pub enum Mode {
    /// Classic mode with 8-bytes data.
    #[default]
    Classic,
    /// Transmission and reception of CAN FD frames (with up to 64 bytes of
    /// data) is enabled. This does not prevent use of classic CAN frames.
    Fd {
        /// If `true`, FD frames can be transmitted with bit rate switching.
        /// Otherwise, attempts to transmit bit rate switched frames will
        /// return errors.
        ///
        /// Regardless of this setting, data phase timing still must be
        /// configured as *reception* of bit-rate-switched messages is still
        /// possible.
        allow_bit_rate_switching: bool,
        /// Bit timing target for the data phase of bit rate switched FD
        /// frames.
        data_phase_timing: BitTiming,
        /// Transceiver delay compensation offset in clock periods (0..=31),
        /// `None` disables compensation.
        transceiver_delay_compensation: Option<u8>,
    },
}

/// Bit-timing target
///
/// The segment split is derived from the protocol engine clock by
/// [`BitTimingConfig::nominal`] and [`BitTimingConfig::data_phase`].
#[derive(Copy, Clone, Debug)]
pub struct BitTiming {
    /// The bitrate of the bus. The protocol engine clock has to be an exact
    /// multiple of `bitrate * time_quanta_per_bit` for some supported number
    /// of time quanta.
    pub bitrate: HertzU32,
    /// Desired sample point in permille of the bit time
    pub sample_point: u16,
}

impl BitTiming {
    /// Create an instance sampling at 80 % of the bit time
    pub fn new(bitrate: HertzU32) -> Self {
        Self {
            bitrate,
            sample_point: 800,
        }
    }
}

/// Bit timing as programmed into the controller
///
/// `prescaler` is stored the way the register expects it (divider minus
/// one); segment lengths are *real* values in time quanta.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTimingConfig {
    /// Clock divider minus one
    pub prescaler: u16,
    /// Propagation segment
    pub propagation_segment: u8,
    /// Phase segment before the sample point
    pub phase_segment_1: u8,
    /// Phase segment after the sample point
    pub phase_segment_2: u8,
    /// Resynchronization jump width
    pub resync_jump_width: u8,
}

/// Data phase part of a CAN FD configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataPhase {
    /// Data phase bit timing
    pub timing: BitTimingConfig,
    /// Bit rate switching enabled for transmission
    pub bit_rate_switching: bool,
    /// Transceiver delay compensation offset, if enabled
    pub transceiver_delay_compensation: Option<u8>,
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, Clone, PartialEq)]
pub enum BitTimingError {
    /// Sample point is outside the wrapped `RangeInclusive` (permille)
    SamplePointOutOfRange {
        /// Lowest accepted sample point
        min: u16,
        /// Highest accepted sample point
        max: u16,
    },
    /// No prescaler and bit time combination divides the clock exactly
    ///
    /// The following requirement must be met for some supported
    /// `bit_time_quanta`:
    /// - `can_clock` must be divisible by `bitrate * bit_time_quanta`
    NoExactSolution {
        /// Provided protocol engine clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
    },
    /// Exact divisors exist but none of them can be split into segments
    /// within the register ranges
    NoValidSegmentSplit {
        /// Provided protocol engine clock
        can_clock: HertzU32,
        /// Bitrate requested in [`BitTiming`]
        bitrate: HertzU32,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for BitTiming {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "BitTiming {{ bitrate: {=u32} Hz, sample_point: {=u16} }}",
            self.bitrate.to_Hz(),
            self.sample_point
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BitTimingError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::SamplePointOutOfRange { min, max } => {
                defmt::write!(f, "SamplePointOutOfRange({=u16}..={=u16})", *min, *max)
            }
            Self::NoExactSolution { can_clock, bitrate } => defmt::write!(
                f,
                "NoExactSolution({=u32} Hz / {=u32} Hz)",
                can_clock.to_Hz(),
                bitrate.to_Hz()
            ),
            Self::NoValidSegmentSplit { can_clock, bitrate } => defmt::write!(
                f,
                "NoValidSegmentSplit({=u32} Hz / {=u32} Hz)",
                can_clock.to_Hz(),
                bitrate.to_Hz()
            ),
        }
    }
}

/// Valid values of a BitTimingConfig struct
#[derive(Clone)]
pub(crate) struct BitTimingRanges {
    /// The bit time, in time quanta
    time_quanta_per_bit: RangeInclusive<u32>,
    /// Clock divider, not register encoded
    prescaler: RangeInclusive<u32>,
    propagation_segment: RangeInclusive<u32>,
    phase_segment_1: RangeInclusive<u32>,
    phase_segment_2: RangeInclusive<u32>,
    resync_jump_width: RangeInclusive<u32>,
}

pub(crate) const NOMINAL_BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    time_quanta_per_bit: 8..=25,
    prescaler: 1..=1024,
    propagation_segment: 1..=64,
    phase_segment_1: 1..=32,
    phase_segment_2: 2..=32,
    resync_jump_width: 1..=32,
};

pub(crate) const DATA_BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    time_quanta_per_bit: 5..=25,
    prescaler: 1..=1024,
    propagation_segment: 1..=31,
    phase_segment_1: 1..=8,
    phase_segment_2: 2..=8,
    resync_jump_width: 1..=8,
};

const SAMPLE_POINT_RANGE: RangeInclusive<u16> = 500..=950;

/// Segment lengths for a fixed number of time quanta
struct Segments {
    propagation: u32,
    phase_1: u32,
    phase_2: u32,
    resync_jump_width: u32,
}

impl Segments {
    /// Splits `quanta` around `sample_point` (permille).
    ///
    /// Phase segment 1 mirrors phase segment 2 where the ranges allow it,
    /// the propagation segment takes the remainder.
    fn split(quanta: u32, sample_point: u32, valid: &BitTimingRanges) -> Option<Self> {
        let after_sync = quanta - 1;
        let max_tseg1 = valid.propagation_segment.end() + valid.phase_segment_1.end();
        let min_tseg1 = valid.propagation_segment.start() + valid.phase_segment_1.start();

        let sample = (quanta * sample_point + 500) / 1000;
        let phase_2 = quanta
            .saturating_sub(sample)
            .clamp(*valid.phase_segment_2.start(), *valid.phase_segment_2.end())
            .max(after_sync.saturating_sub(max_tseg1));
        if !valid.phase_segment_2.contains(&phase_2) || after_sync < phase_2 + min_tseg1 {
            return None;
        }

        let tseg1 = after_sync - phase_2;
        let phase_1 = phase_2
            .clamp(*valid.phase_segment_1.start(), *valid.phase_segment_1.end())
            .min(tseg1 - valid.propagation_segment.start())
            .max(tseg1.saturating_sub(*valid.propagation_segment.end()));
        if !valid.phase_segment_1.contains(&phase_1) {
            return None;
        }
        let propagation = tseg1 - phase_1;
        if !valid.propagation_segment.contains(&propagation) {
            return None;
        }

        let resync_jump_width = phase_1.min(phase_2).min(*valid.resync_jump_width.end());
        Some(Self {
            propagation,
            phase_1,
            phase_2,
            resync_jump_width,
        })
    }

    /// Distance between the achieved and the requested sample point, in
    /// parts per million of the bit time
    fn sample_point_error(&self, quanta: u32, sample_point: u32) -> u32 {
        let achieved = (quanta - self.phase_2) * 1_000_000 / quanta;
        achieved.abs_diff(sample_point * 1_000)
    }
}

impl BitTimingConfig {
    /// Computes the nominal (arbitration phase) timing for `target` from the
    /// protocol engine clock `can_clock`.
    ///
    /// ```
    /// use flexcan::config::{BitTiming, BitTimingConfig};
    /// use fugit::RateExtU32 as _;
    ///
    /// let timing = BitTimingConfig::nominal(8.MHz(), &BitTiming::new(500.kHz())).unwrap();
    /// assert_eq!(timing.divider() * timing.time_quanta_per_bit() * 500_000, 8_000_000);
    /// ```
    pub fn nominal(can_clock: HertzU32, target: &BitTiming) -> Result<Self, BitTimingError> {
        Self::calculate(can_clock, target, &NOMINAL_BIT_TIMING_RANGES)
    }

    /// Computes the data phase timing of bit rate switched FD frames for
    /// `target` from the protocol engine clock `can_clock`.
    pub fn data_phase(can_clock: HertzU32, target: &BitTiming) -> Result<Self, BitTimingError> {
        Self::calculate(can_clock, target, &DATA_BIT_TIMING_RANGES)
    }

    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.propagation_segment)
            + u32::from(self.phase_segment_1)
            + u32::from(self.phase_segment_2)
    }

    /// Clock divider producing one time quantum
    pub fn divider(&self) -> u32 {
        u32::from(self.prescaler) + 1
    }

    /// Searches all supported bit times, longest first, for an exact
    /// divider and keeps the split closest to the requested sample point.
    pub(crate) fn calculate(
        can_clock: HertzU32,
        target: &BitTiming,
        valid: &BitTimingRanges,
    ) -> Result<Self, BitTimingError> {
        if !SAMPLE_POINT_RANGE.contains(&target.sample_point) {
            return Err(BitTimingError::SamplePointOutOfRange {
                min: *SAMPLE_POINT_RANGE.start(),
                max: *SAMPLE_POINT_RANGE.end(),
            });
        }
        let clock = u64::from(can_clock.to_Hz());
        let bitrate = u64::from(target.bitrate.to_Hz());
        let sample_point = u32::from(target.sample_point);

        let mut exact = false;
        let mut best: Option<(u32, u32, Segments, u32)> = None;
        for quanta in valid.time_quanta_per_bit.clone().rev() {
            let quantum_rate = bitrate * u64::from(quanta);
            if quantum_rate == 0 || clock % quantum_rate != 0 {
                continue;
            }
            let divider = match u32::try_from(clock / quantum_rate) {
                Ok(divider) if valid.prescaler.contains(&divider) => divider,
                _ => continue,
            };
            exact = true;
            let Some(segments) = Segments::split(quanta, sample_point, valid) else {
                continue;
            };
            let error = segments.sample_point_error(quanta, sample_point);
            if best.as_ref().map_or(true, |(_, _, _, e)| error < *e) {
                best = Some((quanta, divider, segments, error));
            }
        }

        match best {
            Some((_, divider, segments, _)) => Ok(Self {
                // Ranges above keep every field within its integer type
                prescaler: (divider - 1) as u16,
                propagation_segment: segments.propagation as u8,
                phase_segment_1: segments.phase_1 as u8,
                phase_segment_2: segments.phase_2 as u8,
                resync_jump_width: segments.resync_jump_width as u8,
            }),
            None if exact => Err(BitTimingError::NoValidSegmentSplit {
                can_clock,
                bitrate: target.bitrate,
            }),
            None => Err(BitTimingError::NoExactSolution {
                can_clock,
                bitrate: target.bitrate,
            }),
        }
    }
}
