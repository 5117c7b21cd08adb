//! # Channel Buffer Store
//!
//! Twelve bounded channel histories plus one timestamp history, all
//! co-indexed: index *i* of every channel belongs to index *i* of the
//! timestamps.
//!
//! All thirteen deques sit behind a single `RwLock`, so an append is one
//! write-locked step and a snapshot is one read-locked copy. Readers never
//! see a vector that is only partly appended.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::VecDeque;

use crate::reading::{ChannelId, ReadingVector, CHANNEL_COUNT};

/// Default history length (10 hours at 1 Hz)
pub const DEFAULT_CAPACITY: usize = 36_000;

#[derive(Debug)]
struct Histories {
    timestamps: VecDeque<DateTime<Local>>,
    channels: [VecDeque<f64>; CHANNEL_COUNT],
}

/// Owned copy of part of the store taken at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Tick time of each sample, oldest first
    pub timestamps: Vec<DateTime<Local>>,

    /// Requested channels with their values, same length as `timestamps`
    pub channels: Vec<(ChannelId, Vec<f64>)>,
}

impl Snapshot {
    /// Number of samples in the snapshot
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Values of one channel, if it was requested
    pub fn channel(&self, id: ChannelId) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|(ch, _)| *ch == id)
            .map(|(_, values)| values.as_slice())
    }
}

/// Bounded, co-indexed ring buffers shared between the acquisition worker
/// (single writer) and any number of snapshot readers
#[derive(Debug)]
pub struct ChannelBufferStore {
    capacity: usize,
    inner: RwLock<Histories>,
}

impl ChannelBufferStore {
    /// Create an empty store
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Histories {
                timestamps: VecDeque::with_capacity(capacity),
                channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
            }),
        }
    }

    /// Append one reading, evicting the oldest sample when full
    pub fn append(&self, reading: &ReadingVector) {
        let mut inner = self.inner.write();

        if inner.timestamps.len() == self.capacity {
            inner.timestamps.pop_front();
            for channel in inner.channels.iter_mut() {
                channel.pop_front();
            }
        }

        inner.timestamps.push_back(reading.timestamp);
        for (channel, &value) in inner.channels.iter_mut().zip(reading.values.iter()) {
            channel.push_back(value);
        }
    }

    /// Copy the timestamps and the requested channels
    ///
    /// Channels are returned in the order requested; duplicates are kept.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Local;
    /// use magnetometer_daq::buffer::ChannelBufferStore;
    /// use magnetometer_daq::reading::{ChannelId, ReadingVector};
    ///
    /// let store = ChannelBufferStore::new(4);
    /// store.append(&ReadingVector::new(Local::now(), [0.5; 12]));
    ///
    /// let ch1 = ChannelId::new(1)?;
    /// let snap = store.snapshot(&[ch1]);
    /// assert_eq!(snap.channel(ch1), Some(&[0.5][..]));
    /// # Ok::<(), magnetometer_daq::error::UsageError>(())
    /// ```
    pub fn snapshot(&self, channel_ids: &[ChannelId]) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            timestamps: inner.timestamps.iter().copied().collect(),
            channels: channel_ids
                .iter()
                .map(|&id| (id, inner.channels[id.index()].iter().copied().collect()))
                .collect(),
        }
    }

    /// Most recent complete reading
    pub fn latest(&self) -> Option<ReadingVector> {
        let inner = self.inner.read();
        let timestamp = *inner.timestamps.back()?;
        let mut values = [f64::NAN; CHANNEL_COUNT];
        for (slot, channel) in values.iter_mut().zip(inner.channels.iter()) {
            if let Some(&v) = channel.back() {
                *slot = v;
            }
        }
        Some(ReadingVector::new(timestamp, values))
    }

    pub fn len(&self) -> usize {
        self.inner.read().timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ChannelBufferStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
