//! # Magnetometer Controller Wire Protocol
//!
//! Single-byte ASCII commands, line-terminated ASCII replies.
//!
//! | Command | Reply |
//! |---------|-------|
//! | `R` | 12 whitespace-separated floats (8 decimals), `\n` |
//! | `I` | `Magnetometer Controller\r\n` |
//!
//! A channel whose sensor did not answer in time is reported as
//! `999.00000000`.

use crate::error::LinkError;
use crate::reading::{ChannelValues, CHANNEL_COUNT};

/// Read all channels
pub const CMD_READ: u8 = b'R';

/// Ask the controller for its name
pub const CMD_IDENTIFY: u8 = b'I';

/// Name the controller firmware answers [`CMD_IDENTIFY`] with
pub const EXPECTED_IDENTITY: &str = "Magnetometer Controller";

/// Value the firmware writes for a channel it could not read
pub const ERROR_CODE: f64 = 999.0;

/// Default serial baud rate of the controller
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Parse one reading reply into channel values
///
/// Tokens may be separated by any whitespace. A token equal to
/// [`ERROR_CODE`] becomes `NaN`.
///
/// # Errors
///
/// - `Malformed`: a token is not a float
/// - `TokenCount`: the line does not hold exactly 12 tokens
///
/// # Examples
///
/// ```
/// use magnetometer_daq::device::protocol::parse_reading_line;
///
/// let line = "999.00000000\t0.2\t0.3\t0.4\t0.5\t0.6\t0.7\t0.8\t0.9\t0.10\t0.11\t0.12\r\n";
/// let values = parse_reading_line(line)?;
/// assert!(values[0].is_nan());
/// assert_eq!(values[1], 0.2);
/// # Ok::<(), magnetometer_daq::error::LinkError>(())
/// ```
pub fn parse_reading_line(line: &str) -> Result<ChannelValues, LinkError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != CHANNEL_COUNT {
        return Err(LinkError::TokenCount {
            expected: CHANNEL_COUNT,
            got: tokens.len(),
        });
    }

    let mut values = [0.0; CHANNEL_COUNT];
    for (slot, token) in values.iter_mut().zip(tokens) {
        let value: f64 = token.parse().map_err(|_| LinkError::Malformed {
            token: token.to_string(),
            line: line.trim_end().to_string(),
        })?;
        *slot = if value == ERROR_CODE { f64::NAN } else { value };
    }

    Ok(values)
}

/// Strip the line terminator from an identify reply
pub fn parse_identity_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
