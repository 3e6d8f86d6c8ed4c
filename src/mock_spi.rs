//! Scripted stand-in for the SPI link, used by the unit tests.
//!
//! The chip side of the handshake is simulated per transaction: the first
//! byte after chip select is answered with the address acknowledge, the
//! second with the control acknowledge, and every byte after that pops the
//! next scripted reply (0x00 once the script runs dry). Everything the
//! driver clocks out is recorded in `written`.

use core::convert::Infallible;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::spi::{self, ErrorType as SpiErrorType, SpiBus};

use crate::commands::{ADDR_ANSW, CMD_ANSW};

#[derive(Debug)]
pub struct MockSpiError;

impl spi::Error for MockSpiError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

pub struct BusState {
    selected: bool,
    position: usize,
    pub written: Vec<u8>,
    pub replies: VecDeque<u8>,
    pub addr_answer: u8,
    pub cmd_answer: u8,
}

impl BusState {
    fn exchange(&mut self, byte: u8) -> u8 {
        assert!(self.selected, "byte exchanged without chip select");
        let answer = match self.position {
            0 => self.addr_answer,
            1 => self.cmd_answer,
            _ => self.replies.pop_front().unwrap_or(0x00),
        };
        self.written.push(byte);
        self.position += 1;
        answer
    }
}

pub type Handle = Rc<RefCell<BusState>>;

pub fn mock_bus() -> (MockSpi, MockCs, Handle) {
    let state = Rc::new(RefCell::new(BusState {
        selected: false,
        position: 0,
        written: Vec::new(),
        replies: VecDeque::new(),
        addr_answer: ADDR_ANSW,
        cmd_answer: CMD_ANSW,
    }));
    (
        MockSpi {
            state: Rc::clone(&state),
        },
        MockCs {
            state: Rc::clone(&state),
        },
        state,
    )
}

pub struct MockSpi {
    state: Handle,
}

impl SpiErrorType for MockSpi {
    type Error = MockSpiError;
}

impl SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), MockSpiError> {
        let mut state = self.state.borrow_mut();
        for slot in words.iter_mut() {
            *slot = state.exchange(0x00);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), MockSpiError> {
        let mut state = self.state.borrow_mut();
        for &word in words {
            state.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), MockSpiError> {
        let mut state = self.state.borrow_mut();
        let length = read.len().max(write.len());
        for index in 0..length {
            let answer = state.exchange(write.get(index).copied().unwrap_or(0x00));
            if let Some(slot) = read.get_mut(index) {
                *slot = answer;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), MockSpiError> {
        let mut state = self.state.borrow_mut();
        for word in words.iter_mut() {
            *word = state.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MockSpiError> {
        Ok(())
    }
}

pub struct MockCs {
    state: Handle,
}

impl PinErrorType for MockCs {
    type Error = Infallible;
}

impl OutputPin for MockCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        state.selected = true;
        state.position = 0;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.state.borrow_mut().selected = false;
        Ok(())
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
