//! # Magnetometer DAQ Library
//!
//! Acquire, buffer and log 12-channel magnetometer readings over a serial
//! link.
//!
//! This library provides the acquisition core: a fixed-period sampler, a
//! single-owner device link, bounded co-indexed channel buffers for live
//! display, and an append-only, date-partitioned reading log. A
//! [`session::Session`] ties them together and is the handle a presentation
//! layer uses.

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod logger;
pub mod reading;
pub mod session;
