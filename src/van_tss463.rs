use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::channel::{self, ChannelMode, LengthAndStatus};
use crate::commands::*;
use crate::errors::VanError;
use crate::registers::*;

// Inter-byte gaps from the chip's serial interface timing. These are
// ordering constraints of the handshake, not tunables.
const T_SELECT_TO_ADDRESS_MS: u32 = 4;
const T_ADDRESS_TO_CONTROL_MS: u32 = 8;
const T_CONTROL_TO_DATA_MS: u32 = 15;
const T_DATA_TO_DESELECT_MS: u32 = 12;

const SETTLE_MS: u32 = 10;
const POLL_INTERVAL_MS: u32 = 1;

/// Driver for a TSS463-family VAN bus controller on an SPI link.
///
/// All chip state lives on the chip itself; the driver only holds the
/// transport handles and a counter of handshake acknowledge mismatches.
pub struct VanTss463<SPI, CS, DELAY> {
    spi: SPI,
    cs: CS,
    delay: DELAY,
    handshake_errors: u16,
}

impl<SPI, CS, DELAY> VanTss463<SPI, CS, DELAY>
where
    SPI: SpiBus<u8>,
    CS: OutputPin<Error = core::convert::Infallible>,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, delay: DELAY) -> Self {
        VanTss463 {
            spi,
            cs,
            delay,
            handshake_errors: 0,
        }
    }

    /// Brings the chip into active bus operation: selects the SPI interface
    /// variant, disables every channel, programs line and transmit control,
    /// enables the reception interrupt, activates the line and wipes the
    /// message RAM.
    pub fn init(&mut self) -> Result<(), VanError> {
        self.motorola_mode()?;
        self.delay.delay_ms(SETTLE_MS);

        for channel in 0..CHANNELS {
            self.disable_channel(channel)?;
            self.delay.delay_ms(SETTLE_MS);
        }

        // Clock divider /2: 500 kTS/s from a 16 MHz crystal
        self.register_set(LINE_CONTROL_REG, 0x20)?;
        self.delay.delay_ms(SETTLE_MS);

        // One transmission retry, DLC version bits fixed at 001
        self.register_set(TRANSMIT_CONTROL_REG, 0x03)?;
        self.delay.delay_ms(SETTLE_MS);

        self.register_set(INTERRUPT_ENABLE_REG, 0x80 | INT_ROKE)?;
        self.delay.delay_ms(SETTLE_MS);

        self.register_set(COMMAND_REG, CMD_ACTI)?;
        self.delay.delay_ms(SETTLE_MS);

        self.handshake_errors = 0;

        self.registers_set(mailbox_address(0), &[0x00; MAILBOX_SIZE as usize])?;

        Ok(())
    }

    /// Count of address/control acknowledge bytes that did not match the
    /// expected echo. Mismatches never abort an operation; they only
    /// accumulate here. Cleared by `init`.
    pub fn handshake_errors(&self) -> u16 {
        self.handshake_errors
    }

    /// Writes one register.
    pub fn register_set(&mut self, address: u8, value: u8) -> Result<(), VanError> {
        self.registers_set(address, core::slice::from_ref(&value))
    }

    /// Writes a block of registers, relying on the chip's internal address
    /// auto-increment.
    pub fn registers_set(&mut self, address: u8, values: &[u8]) -> Result<(), VanError> {
        self.cs.set_low().ok();
        let result = self.stream_write(address, values);
        self.cs.set_high().ok();
        result
    }

    /// Reads one register.
    pub fn register_get(&mut self, address: u8) -> Result<u8, VanError> {
        let mut value = [0x00];
        self.registers_get(address, &mut value)?;
        Ok(value[0])
    }

    /// Reads a block of registers into `buf` via address auto-increment.
    pub fn registers_get(&mut self, address: u8, buf: &mut [u8]) -> Result<(), VanError> {
        self.cs.set_low().ok();
        let result = self.stream_read(address, buf);
        self.cs.set_high().ok();
        result
    }

    /// Releases a channel: identifier, command, pointer and length/status
    /// are zeroed, and the identifier mask is cleared so no filter remains.
    pub fn disable_channel(&mut self, channel: u8) -> Result<(), VanError> {
        let base = channel_address(channel);
        self.register_set(base + CH_ID_TAG, 0x00)?;
        self.register_set(base + CH_ID_COMMAND, 0x00)?;
        self.register_set(base + CH_MESSAGE_POINTER, 0x00)?;
        self.register_set(base + CH_LENGTH_STATUS, 0x00)?;
        self.register_set(base + CH_ID_MASK_HIGH, 0x00)?;
        self.register_set(base + CH_ID_MASK_LOW, 0x00)?;
        Ok(())
    }

    /// Queues a frame for transmission. `require_ack` requests an in-frame
    /// acknowledge from the consumer.
    pub fn set_channel_for_transmit_message(
        &mut self,
        channel: u8,
        identifier: u16,
        values: &[u8],
        require_ack: bool,
    ) -> Result<(), VanError> {
        self.configure_channel(ChannelMode::Transmit, channel, identifier, values, 0, require_ack)
    }

    /// Arms a channel to receive a frame of up to `message_length` payload
    /// bytes for the given identifier.
    pub fn set_channel_for_receive_message(
        &mut self,
        channel: u8,
        identifier: u16,
        message_length: u8,
    ) -> Result<(), VanError> {
        self.configure_channel(ChannelMode::Receive, channel, identifier, &[], message_length, false)
    }

    /// Arms a channel to capture a reply frame produced by another module's
    /// reply request, without transmitting anything.
    pub fn set_channel_for_reply_request_message_without_transmission(
        &mut self,
        channel: u8,
        identifier: u16,
        message_length: u8,
    ) -> Result<(), VanError> {
        self.configure_channel(
            ChannelMode::ReplyRequestNoTx,
            channel,
            identifier,
            &[],
            message_length,
            false,
        )
    }

    /// Transmits a reply request frame and arms the channel for the reply.
    pub fn set_channel_for_reply_request_message(
        &mut self,
        channel: u8,
        identifier: u16,
        message_length: u8,
    ) -> Result<(), VanError> {
        self.configure_channel(
            ChannelMode::ReplyRequest,
            channel,
            identifier,
            &[],
            message_length,
            false,
        )
    }

    /// Stages a reply served in-frame as soon as a matching request arrives.
    pub fn set_channel_for_immediate_reply_message(
        &mut self,
        channel: u8,
        identifier: u16,
        values: &[u8],
    ) -> Result<(), VanError> {
        self.configure_channel(ChannelMode::ImmediateReply, channel, identifier, values, 0, false)
    }

    /// Stages a reply transmitted in a separate frame after a matching
    /// request has been seen.
    pub fn set_channel_for_deferred_reply_message(
        &mut self,
        channel: u8,
        identifier: u16,
        values: &[u8],
    ) -> Result<(), VanError> {
        self.configure_channel(ChannelMode::DeferredReply, channel, identifier, values, 0, false)
    }

    /// Arms a channel to flag an incoming reply request without serving it.
    pub fn set_channel_for_reply_request_detection_message(
        &mut self,
        channel: u8,
        identifier: u16,
        message_length: u8,
    ) -> Result<(), VanError> {
        self.configure_channel(
            ChannelMode::ReplyRequestDetection,
            channel,
            identifier,
            &[],
            message_length,
            false,
        )
    }

    /// Reads the channel's length/status register so completion can be
    /// polled without touching the rest of the channel state.
    pub fn message_available(&mut self, channel: u8) -> Result<LengthAndStatus, VanError> {
        let raw = self.register_get(channel_address(channel) + CH_LENGTH_STATUS)?;
        Ok(LengthAndStatus::unpack(raw))
    }

    /// Polls the channel until the chip reports a completed reception,
    /// giving up after `max_polls` attempts.
    pub fn wait_for_reception(
        &mut self,
        channel: u8,
        max_polls: u16,
    ) -> Result<LengthAndStatus, VanError> {
        for _ in 0..max_polls {
            let status = self.message_available(channel)?;
            if status.receive_done {
                return Ok(status);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        Err(VanError::Timeout)
    }

    /// Copies the received frame on `channel` into `buf`: the two identifier
    /// bytes first, then the payload. Returns the filled length (payload
    /// plus the two identifier bytes; the status byte is not included).
    ///
    /// The message stays marked on the chip; it is cleared by the next
    /// channel reconfiguration.
    pub fn read_message(&mut self, channel: u8, buf: &mut [u8]) -> Result<u8, VanError> {
        let base = channel_address(channel);
        let id1 = self.register_get(base + CH_ID_TAG)?;
        let id2 = self.register_get(base + CH_ID_COMMAND)?;
        let status_offset = self.register_get(base + CH_MESSAGE_POINTER)? & channel::POINTER_MASK;

        let status = self.register_get(mailbox_address(status_offset))?;
        let length = status & channel::RECEIVED_LENGTH_MASK;
        let _command = status >> channel::RECEIVED_COMMAND_SHIFT; // COM bits of the frame, unused here

        buf[0] = id1;
        buf[1] = id2;
        let data_offset = channel * RX_BUFFER_SPACING + 1;
        self.registers_get(mailbox_address(data_offset), &mut buf[2..2 + length as usize])?;

        Ok(length + 2)
    }

    /// Channel index of the most recently completed exchange.
    pub fn last_channel(&mut self) -> Result<u8, VanError> {
        let status = self.register_get(LAST_MESSAGE_STATUS_REG)?;
        Ok(status & LAST_CHANNEL_MASK)
    }

    fn configure_channel(
        &mut self,
        mode: ChannelMode,
        channel: u8,
        identifier: u16,
        values: &[u8],
        message_length: u8,
        require_ack: bool,
    ) -> Result<(), VanError> {
        let (id1, id2) = channel::split_identifier(identifier);
        let length = if mode.carries_payload() {
            values.len() as u8
        } else {
            message_length
        };
        let pointer = mode.message_pointer(channel, length);

        // Outgoing payload goes into the mailbox first; the chip may act on
        // the channel registers the moment they are written.
        if mode.carries_payload() {
            self.registers_set(mailbox_address(pointer + 1), values)?;
        }

        self.setup_channel(
            channel,
            id1,
            id2,
            mode.command_byte(id2, require_ack),
            mode.pointer_byte(pointer),
            mode.length_status_byte(length),
        )
    }

    fn setup_channel(
        &mut self,
        channel: u8,
        id1: u8,
        id2: u8,
        command: u8,
        pointer: u8,
        length_status: u8,
    ) -> Result<(), VanError> {
        let base = channel_address(channel);
        self.register_set(base + CH_ID_TAG, id1)?;
        self.register_set(base + CH_ID_COMMAND, command)?;
        self.register_set(base + CH_MESSAGE_POINTER, pointer)?;
        self.register_set(base + CH_LENGTH_STATUS, length_status)?;
        // Mask set to the identifier itself: the channel matches exactly
        self.register_set(base + CH_ID_MASK_HIGH, id1)?;
        self.register_set(base + CH_ID_MASK_LOW, id2 << channel::ID2_SHIFT)?;
        Ok(())
    }

    // First access after reset. The interface variant byte serves as both
    // address and control; the chip acknowledges like a normal handshake.
    fn motorola_mode(&mut self) -> Result<(), VanError> {
        self.cs.set_low().ok();
        let result = self.mode_select_sequence();
        self.cs.set_high().ok();
        result
    }

    fn mode_select_sequence(&mut self) -> Result<(), VanError> {
        self.delay.delay_ms(T_SELECT_TO_ADDRESS_MS);
        if self.spi_transfer(MOTOROLA_MODE)? != ADDR_ANSW {
            self.handshake_errors += 1;
        }
        self.delay.delay_ms(T_ADDRESS_TO_CONTROL_MS);
        if self.spi_transfer(MOTOROLA_MODE)? != CMD_ANSW {
            self.handshake_errors += 1;
        }
        self.delay.delay_ms(T_DATA_TO_DESELECT_MS);
        Ok(())
    }

    fn stream_write(&mut self, address: u8, values: &[u8]) -> Result<(), VanError> {
        self.handshake(address, WRITE)?;
        for &value in values {
            self.spi_transfer(value)?;
        }
        self.delay.delay_ms(T_DATA_TO_DESELECT_MS);
        Ok(())
    }

    fn stream_read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), VanError> {
        self.handshake(address, READ)?;
        for slot in buf.iter_mut() {
            *slot = self.spi_transfer(READ_FILLER)?;
        }
        self.delay.delay_ms(T_DATA_TO_DESELECT_MS);
        Ok(())
    }

    // Address phase then control phase, each of which the chip must echo
    // with its fixed acknowledge byte. A wrong echo is counted and the
    // transfer carries on; breaking off mid-handshake would leave the
    // chip's interface state machine out of step.
    fn handshake(&mut self, address: u8, control: u8) -> Result<(), VanError> {
        self.delay.delay_ms(T_SELECT_TO_ADDRESS_MS);
        if self.spi_transfer(address)? != ADDR_ANSW {
            self.handshake_errors += 1;
        }
        self.delay.delay_ms(T_ADDRESS_TO_CONTROL_MS);
        if self.spi_transfer(control)? != CMD_ANSW {
            self.handshake_errors += 1;
        }
        self.delay.delay_ms(T_CONTROL_TO_DATA_MS);
        Ok(())
    }

    fn spi_transfer(&mut self, byte: u8) -> Result<u8, VanError> {
        let mut read = [0x00];
        self.spi
            .transfer(&mut read, &[byte])
            .map_err(|_| VanError::CommunicationError)?;
        Ok(read[0])
    }
}
