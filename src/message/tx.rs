//! Messages to be sent on the bus

use super::*;

/// Selects the type of the Classic CAN frame.
pub enum ClassicFrameType<'a> {
    /// 0-8 byte message payload
    Data(&'a [u8]),
    /// Requests transmission of the identified frame
    Remote {
        /// Length, in bytes, of the requested frame
        desired_len: usize,
    },
}

/// Selects frame type along with the valid payload type and configuration
/// specific to the chosen format.
pub enum FrameType<'a> {
    /// Classic CAN
    Classic(ClassicFrameType<'a>),
    /// CAN FD frame. Note that the peripheral must be initialized with CAN FD
    /// enabled to support this format.
    FlexibleDatarate {
        /// 0-64 byte message payload. The payload must not be bigger than the
        /// payload size chosen in [`CanConfig::payload`].
        ///
        /// [`CanConfig::payload`]: crate::config::CanConfig::payload
        payload: &'a [u8],
        /// Parts of the frame are transmitted at a higher bit rate. Note that
        /// bit rate switching must be enabled in the peripheral configuration
        /// as well.
        bit_rate_switching: bool,
        /// If `true`, the error state indicator of the message will indicate
        /// 'error passive'. If `false`, the frame is sent as 'error active'.
        force_error_state_indicator: bool,
    },
}

/// Describes a CAN message/frame that is not yet converted to the
/// representation the peripheral understands.
pub struct MessageBuilder<'a> {
    /// CAN identifier for the frame
    pub id: Id,
    /// Message frame type with a payload
    pub frame_type: FrameType<'a>,
}

impl<'a> MessageBuilder<'a> {
    /// Create the frame, rounding FD payloads up to the next valid length
    /// with zero padding.
    pub fn build(self) -> Result<Frame, TooMuchData> {
        let mut data = [0; MAX_PAYLOAD];

        let mut copy_payload = |d: &[u8]| {
            if d.len() > MAX_PAYLOAD {
                return Err(TooMuchData);
            }
            data[..d.len()].copy_from_slice(d);
            Ok(())
        };

        let (fd_format, bit_rate_switching, error_state_indicator, remote, len) =
            match self.frame_type {
                FrameType::Classic(payload) => {
                    let (remote, len) = match payload {
                        ClassicFrameType::Data(payload) => {
                            copy_payload(payload)?;
                            (false, payload.len())
                        }
                        ClassicFrameType::Remote { desired_len } => (true, desired_len),
                    };
                    (false, false, false, remote, len)
                }
                FrameType::FlexibleDatarate {
                    payload,
                    bit_rate_switching,
                    force_error_state_indicator,
                } => {
                    copy_payload(payload)?;
                    (
                        true,
                        bit_rate_switching,
                        force_error_state_indicator,
                        false,
                        payload.len(),
                    )
                }
            };
        let dlc = len_to_dlc(len, fd_format)?;

        Ok(Frame {
            id: self.id,
            dlc,
            data,
            remote,
            fd_format,
            bit_rate_switching,
            error_state_indicator,
            timestamp: 0,
            overrun: false,
        })
    }
}
