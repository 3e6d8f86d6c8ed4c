#![cfg_attr(not(test), no_std)]
// src/lib.rs

pub mod channel;
pub mod commands;
pub mod errors;
pub mod registers;
pub mod van_tss463;

#[cfg(test)]
mod mock_spi;

pub use channel::{ChannelMode, LengthAndStatus};
pub use errors::VanError;
pub use van_tss463::VanTss463;
