//! # Reading Vector
//!
//! One sampling cycle's worth of data: 12 channel magnitudes (µT) and the
//! wall-clock time of the tick that produced them.

use chrono::{DateTime, Local};

use crate::error::UsageError;

/// Number of sensor channels on the instrument
pub const CHANNEL_COUNT: usize = 12;

/// Channel values for one cycle; `NaN` marks a missing reading
pub type ChannelValues = [f64; CHANNEL_COUNT];

/// One complete sample, appended and logged as a unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingVector {
    /// Time of the sampler tick that triggered this reading
    pub timestamp: DateTime<Local>,

    /// Per-channel magnitudes, index 0 is channel 1
    pub values: ChannelValues,
}

impl ReadingVector {
    pub fn new(timestamp: DateTime<Local>, values: ChannelValues) -> Self {
        Self { timestamp, values }
    }

    /// Number of channels with no valid reading
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }
}

/// A validated 1-based channel id (1..=12)
///
/// # Examples
///
/// ```
/// use magnetometer_daq::reading::ChannelId;
///
/// let ch = ChannelId::new(3)?;
/// assert_eq!(ch.get(), 3);
/// assert_eq!(ch.index(), 2);
/// assert!(ChannelId::new(0).is_err());
/// # Ok::<(), magnetometer_daq::error::UsageError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Validate a 1-based channel number
    ///
    /// # Errors
    ///
    /// Returns `UsageError::InvalidChannel` outside `1..=12`
    pub fn new(id: usize) -> Result<Self, UsageError> {
        if (1..=CHANNEL_COUNT).contains(&id) {
            Ok(Self(id as u8))
        } else {
            Err(UsageError::InvalidChannel(id))
        }
    }

    /// Every channel in ascending order
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (1..=CHANNEL_COUNT as u8).map(ChannelId)
    }

    /// Validate a list of channel numbers, failing on the first bad one
    pub fn parse_list(ids: &[usize]) -> Result<Vec<ChannelId>, UsageError> {
        ids.iter().map(|&id| Self::new(id)).collect()
    }

    /// 1-based channel number
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// 0-based index into a [`ChannelValues`] array
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for ChannelId {
    type Error = UsageError;

    fn try_from(id: usize) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_channel_id_bounds() {
        assert!(ChannelId::new(1).is_ok());
        assert!(ChannelId::new(12).is_ok());
        assert_eq!(ChannelId::new(0), Err(UsageError::InvalidChannel(0)));
        assert_eq!(ChannelId::new(13), Err(UsageError::InvalidChannel(13)));
    }

    #[test]
    fn test_channel_id_all_is_ordered() {
        let ids: Vec<usize> = ChannelId::all().map(ChannelId::get).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_parse_list_rejects_any_invalid() {
        assert_eq!(ChannelId::parse_list(&[1, 5, 12]).unwrap().len(), 3);
        assert_eq!(
            ChannelId::parse_list(&[1, 20, 3]),
            Err(UsageError::InvalidChannel(20))
        );
    }

    #[test]
    fn test_missing_count() {
        let ts = Local.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let mut values = [1.0; CHANNEL_COUNT];
        values[0] = f64::NAN;
        values[11] = 12.5;
        let reading = ReadingVector::new(ts, values);

        assert!(reading.values[0].is_nan());
        assert_eq!(reading.values[11], 12.5);
        assert_eq!(reading.missing_count(), 1);
    }
}
