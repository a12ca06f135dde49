mod gpio;

use crate::lcd::hd44780::{Hd44780Error, Hd44780Result};
pub use gpio::*;
use std::fmt::Debug;

/// Command surface of an HD44780-class controller.
///
/// Everything here is built from two primitives: an Instruction transfer
/// (RS low) and a Data transfer (RS high). Implementations provide those
/// plus a status read; the defaults assemble the instruction bytes.
pub trait Hd44780Driver: Debug {
    /// The column/row layout this driver was configured for.
    fn geometry(&self) -> ScreenGeometry;

    /// Sends one instruction byte (RS = 0) and waits for it to settle.
    fn send_instruction(&mut self, instruction: u8) -> Hd44780Result<()>;

    /// Sends one data byte (RS = 1) and waits for it to settle.
    fn send_data(&mut self, data: u8) -> Hd44780Result<()>;

    /// Reads the busy flag and address counter byte (RS = 0, R/W = 1).
    fn read_status(&mut self) -> Hd44780Result<u8>;

    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> Hd44780Result<()> {
        self.send_instruction(0b0000_0001)
    }

    /// Sets the cursor to the home position and undoes display shifts.
    fn return_home(&mut self) -> Hd44780Result<()> {
        self.send_instruction(0b0000_0010)
    }

    /// Sets the cursor move direction and whether writes shift the display.
    fn set_entry_mode(
        &mut self,
        cursor_direction: CursorDirection,
        shift_display: bool,
    ) -> Hd44780Result<()> {
        let mut instruction = 0b0000_0100;
        if cursor_direction == CursorDirection::Right {
            instruction |= 0b0000_0010;
        }
        if shift_display {
            instruction |= 0b0000_0001;
        }
        self.send_instruction(instruction)
    }

    /// Sets the display on/off, cursor on/off, and blinking on/off.
    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> Hd44780Result<()> {
        let mut instruction = 0b0000_1000;
        if display_on {
            instruction |= 0b0000_0100;
        }
        if cursor_on {
            instruction |= 0b0000_0010;
        }
        if blink_on {
            instruction |= 0b0000_0001;
        }
        self.send_instruction(instruction)
    }

    /// Moves the cursor, or shifts the whole display, one step.
    fn shift(&mut self, target: ShiftTarget, direction: CursorDirection) -> Hd44780Result<()> {
        let mut instruction = 0b0001_0000;
        if target == ShiftTarget::Display {
            instruction |= 0b0000_1000;
        }
        if direction == CursorDirection::Right {
            instruction |= 0b0000_0100;
        }
        self.send_instruction(instruction)
    }

    /// Sets the DDRAM address the next data transfer targets.
    fn set_ddram_address(&mut self, address: u8) -> Hd44780Result<()> {
        if address > 0b0111_1111 {
            return Err(Hd44780Error::InvalidAddress);
        }
        self.send_instruction(0b1000_0000 | address)
    }

    /// Reads the busy flag and the address counter.
    fn busy_flag_and_address(&mut self) -> Hd44780Result<(bool, u8)> {
        let status = self.read_status()?;
        Ok((status & 0b1000_0000 != 0, status & 0b0111_1111))
    }

    /// Moves the cursor to the given column and row.
    ///
    /// Bounded by [`Hd44780Driver::geometry`]; positions outside it return
    /// [`Hd44780Error::InvalidPosition`] without touching the bus.
    fn set_position(&mut self, column: u8, row: u8) -> Hd44780Result<()> {
        let address = self
            .geometry()
            .ddram_address(column, row)
            .ok_or(Hd44780Error::InvalidPosition)?;
        self.set_ddram_address(address)
    }

    /// Writes one character at the cursor position.
    fn write_char(&mut self, ch: u8) -> Hd44780Result<()> {
        self.send_data(ch)
    }

    /// Writes a string, one data transfer per byte, no batching.
    fn write_str(&mut self, text: &str) -> Hd44780Result<()> {
        for &byte in text.as_bytes() {
            self.send_data(byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    Left,
    Right,
}

/// What a shift instruction moves: just the cursor, or the whole display.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShiftTarget {
    Cursor,
    Display,
}

/// Character font selected at function-set time. Protocol bit only; CGRAM
/// content is out of scope for this driver.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Font {
    #[default]
    FiveByEight,
    FiveByTen,
}

/// Column/row layout of the attached glass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub columns: u8,
    pub rows: u8,
}

impl ScreenGeometry {
    /// Standard DDRAM start address of each row.
    const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];

    pub const fn new(columns: u8, rows: u8) -> Self {
        ScreenGeometry { columns, rows }
    }

    /// DDRAM address of the given position, or `None` when it falls
    /// outside this geometry.
    pub fn ddram_address(&self, column: u8, row: u8) -> Option<u8> {
        if column >= self.columns || row >= self.rows || row as usize >= Self::ROW_OFFSETS.len() {
            return None;
        }
        Some(Self::ROW_OFFSETS[row as usize] + column)
    }
}

impl Default for ScreenGeometry {
    /// The ubiquitous 16×2 module.
    fn default() -> Self {
        ScreenGeometry::new(16, 2)
    }
}
