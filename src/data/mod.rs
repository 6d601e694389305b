//! Data structures for logger readings.
//!
//! This module contains the core data types produced by the decoders and
//! consumed by the session: readings, live samples, target devices and the
//! bounded reading buffer.

pub mod buffer;
pub mod device;
pub mod reading;

pub use buffer::{ReadingBuffer, DEFAULT_BUFFER_CAPACITY};
pub use device::{known_device, TargetDevice, KNOWN_DEVICES, LOGIC_360_ADDRESS, TZ_BT04_ADDRESS};
pub use reading::{Humidity, LiveSample, LiveValue, Reading};
