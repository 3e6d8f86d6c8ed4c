use core::fmt::{Debug, Formatter, Result};

use crate::registers::{MAILBOX_SIZE, RX_BUFFER_SPACING};

// ID_TAG/COM register: ID_T[3:0] in the high nibble, command bits below
pub const ID2_SHIFT: u8 = 4;
pub const EXT_BIT: u8 = 1 << 3;
pub const RAK_BIT: u8 = 1 << 2;
pub const RNW_BIT: u8 = 1 << 1;
pub const RTR_BIT: u8 = 1 << 0;

// MESS_PTR register: DRAK above the 7-bit mailbox offset
pub const DRAK_BIT: u8 = 1 << 7;
pub const POINTER_MASK: u8 = 0x7F;

// MESS_L/STA register: M_L[4:0] above the three status bits
pub const LENGTH_SHIFT: u8 = 3;
pub const LENGTH_MASK: u8 = 0x1F;
pub const CHER_BIT: u8 = 1 << 2;
pub const CHTX_BIT: u8 = 1 << 1;
pub const CHRX_BIT: u8 = 1 << 0;

// Message status byte written by the chip into the mailbox:
// RRAK | RRNW | RRTR | RM_L[4:0]
pub const RECEIVED_LENGTH_MASK: u8 = 0x1F;
pub const RECEIVED_COMMAND_SHIFT: u8 = 5;

/// Splits a 12-bit bus identifier into the ID_TAG byte (bits 11..4) and the
/// low nibble packed into the ID_TAG/COM register.
pub fn split_identifier(identifier: u16) -> (u8, u8) {
    (((identifier >> 4) & 0xFF) as u8, (identifier & 0x0F) as u8)
}

pub fn join_identifier(id1: u8, id2: u8) -> u16 {
    ((id1 as u16) << 4) | (id2 as u16 & 0x0F)
}

/// The message exchange semantics a channel can be configured for.
///
/// Each mode maps to one fixed combination of the RNW/RTR command bits, the
/// initial CHTx/CHRx status bits, the DRAK flag and a mailbox pointer rule.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Disabled,
    Transmit,
    Receive,
    ReplyRequestNoTx,
    ReplyRequest,
    ImmediateReply,
    DeferredReply,
    ReplyRequestDetection,
}

/// Initial register bit values for one exchange mode.
pub struct ModeFlags {
    pub rnw: bool,
    pub rtr: bool,
    pub chtx: bool,
    pub chrx: bool,
    pub drak: bool,
}

impl ChannelMode {
    /// Initial setup values per the chip's message type tables.
    pub fn flags(self) -> ModeFlags {
        let bits = |rnw, rtr, chtx, chrx, drak| ModeFlags { rnw, rtr, chtx, chrx, drak };
        match self {
            ChannelMode::Disabled => bits(false, false, false, false, false),
            ChannelMode::Transmit => bits(false, false, false, false, false),
            ChannelMode::Receive => bits(false, true, false, false, true),
            ChannelMode::ReplyRequestNoTx => bits(true, true, false, false, true),
            ChannelMode::ReplyRequest => bits(true, true, false, false, true),
            ChannelMode::ImmediateReply => bits(true, false, false, false, false),
            ChannelMode::DeferredReply => bits(true, false, false, true, true),
            ChannelMode::ReplyRequestDetection => bits(true, false, true, false, true),
        }
    }

    /// Modes whose payload must be staged in the mailbox before the channel
    /// registers are committed.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            ChannelMode::Transmit | ChannelMode::ImmediateReply | ChannelMode::DeferredReply
        )
    }

    /// Mailbox offset of the message area for this mode.
    ///
    /// Everything except Transmit gets the fixed 30-byte area belonging to
    /// the channel. Transmit uses one scratch area at the top of the RAM
    /// sized back from the payload length; that area is shared by every
    /// transmitting channel, so payloads staged on two channels at the same
    /// time alias each other.
    pub fn message_pointer(self, channel: u8, payload_length: u8) -> u8 {
        match self {
            ChannelMode::Transmit => MAILBOX_SIZE - 1 - (payload_length + 1),
            _ => channel * RX_BUFFER_SPACING,
        }
    }

    /// Packs the ID_TAG/COM register byte. The command nibble is fully
    /// determined by the mode; `require_ack` is honored for Transmit only.
    pub fn command_byte(self, id2: u8, require_ack: bool) -> u8 {
        if self == ChannelMode::Disabled {
            return 0x00;
        }
        let flags = self.flags();
        let mut value = (id2 & 0x0F) << ID2_SHIFT | EXT_BIT;
        if flags.rnw {
            value |= RNW_BIT;
        }
        if flags.rtr {
            value |= RTR_BIT;
        }
        if require_ack && self == ChannelMode::Transmit {
            value |= RAK_BIT;
        }
        value
    }

    /// Packs the MESS_PTR register byte from a 7-bit mailbox offset.
    pub fn pointer_byte(self, message_pointer: u8) -> u8 {
        let mut value = message_pointer & POINTER_MASK;
        if self.flags().drak {
            value |= DRAK_BIT;
        }
        value
    }

    /// Packs the MESS_L/STA register byte. M_L is always the payload length
    /// plus one, the CHER bit starts cleared.
    pub fn length_status_byte(self, payload_length: u8) -> u8 {
        let flags = self.flags();
        let mut value = ((payload_length + 1) & LENGTH_MASK) << LENGTH_SHIFT;
        if flags.chtx {
            value |= CHTX_BIT;
        }
        if flags.chrx {
            value |= CHRX_BIT;
        }
        value
    }
}

impl Debug for ChannelMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ChannelMode::Disabled => write!(f, "Disabled"),
            ChannelMode::Transmit => write!(f, "Transmit"),
            ChannelMode::Receive => write!(f, "Receive"),
            ChannelMode::ReplyRequestNoTx => write!(f, "ReplyRequestNoTx"),
            ChannelMode::ReplyRequest => write!(f, "ReplyRequest"),
            ChannelMode::ImmediateReply => write!(f, "ImmediateReply"),
            ChannelMode::DeferredReply => write!(f, "DeferredReply"),
            ChannelMode::ReplyRequestDetection => write!(f, "ReplyRequestDetection"),
        }
    }
}

/// Unpacked MESS_L/STA register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthAndStatus {
    /// M_L field: reserved message length, payload bytes + 1.
    pub length: u8,
    pub error: bool,
    pub transmit_done: bool,
    pub receive_done: bool,
}

impl LengthAndStatus {
    pub fn unpack(raw: u8) -> Self {
        LengthAndStatus {
            length: (raw >> LENGTH_SHIFT) & LENGTH_MASK,
            error: raw & CHER_BIT != 0,
            transmit_done: raw & CHTX_BIT != 0,
            receive_done: raw & CHRX_BIT != 0,
        }
    }
}
