use core::fmt::{Debug, Formatter, Result};
use ufmt::{uDebug, uWrite};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum VanError {
    CommunicationError,
    Timeout,
}

impl Debug for VanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            VanError::CommunicationError => write!(f, "CommunicationError"),
            VanError::Timeout => write!(f, "Timeout"),
        }
    }
}

// Implementing uDebug for VanError
impl uDebug for VanError {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<W>) -> core::result::Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match self {
            VanError::CommunicationError => f.write_str("CommunicationError"),
            VanError::Timeout => f.write_str("Timeout"),
        }
    }
}
