#![doc = include_str!("../README.md")]

mod error;

pub mod network;
pub mod nmea;
pub mod stats;

pub use error::{Error, Result};
