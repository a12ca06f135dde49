//! Byte ↔ bus-frame codec.
//!
//! A frame is what one E pulse latches: the whole byte on an 8-bit bus, or
//! half of it on a 4-bit bus. Frames are transient values produced right
//! before the pulse; nothing stores them.

/// Width of the parallel data bus.
///
/// Chosen when the driver is constructed and fixed for its lifetime; the
/// controller itself is switched to the matching width during the power-on
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    FourBit,
    EightBit,
}

/// Which controller register a transfer targets, i.e. the RS line level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Instruction,
    Data,
}

impl TransferKind {
    /// RS level for this transfer: low for instructions, high for data.
    pub fn rs_level(self) -> bool {
        matches!(self, TransferKind::Data)
    }
}

/// One byte packed for the bus: a single 8-bit pattern, or an ordered
/// nibble pair. The upper nibble always goes out first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Byte(u8),
    Nibbles { upper: u8, lower: u8 },
}

impl Frame {
    pub fn encode(byte: u8, width: BusWidth) -> Frame {
        match width {
            BusWidth::EightBit => Frame::Byte(byte),
            BusWidth::FourBit => Frame::Nibbles {
                upper: (byte >> 4) & 0x0f,
                lower: byte & 0x0f,
            },
        }
    }

    /// Inverse of [`Frame::encode`]; pure, so the packing can be checked
    /// without a bus.
    pub fn decode(self) -> u8 {
        match self {
            Frame::Byte(byte) => byte,
            Frame::Nibbles { upper, lower } => (upper << 4) | (lower & 0x0f),
        }
    }
}
