//! Command-line configuration helpers.

pub mod duration;

pub use duration::{parse_duration, parse_interval};
