use crate::lcd::hd44780::driver::{CursorDirection, Font, Hd44780Driver, ScreenGeometry};
use crate::lcd::hd44780::frame::{BusWidth, Frame, TransferKind};
use crate::lcd::hd44780::{Hd44780Error, Hd44780Result};
use crate::{GpioBias, GpioBus, GpioBusInput, GpioOutput, GpioResult};
use log::trace;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// The data lines, tagged with their width.
///
/// The variant is picked at construction and never changes, so every
/// transfer for the lifetime of a driver uses one width; there is no
/// process-wide mode flag to get out of sync.
#[derive(Debug)]
pub enum DataBus<'a> {
    Four(&'a mut dyn GpioBus<4>),
    Eight(&'a mut dyn GpioBus<8>),
}

impl DataBus<'_> {
    pub fn width(&self) -> BusWidth {
        match self {
            DataBus::Four(_) => BusWidth::FourBit,
            DataBus::Eight(_) => BusWidth::EightBit,
        }
    }
}

/// How a transfer waits for the controller to finish executing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// Sleep the documented worst-case execution time after each transfer.
    /// The only option when the R/W line is tied to ground.
    FixedDelay,
    /// Poll the busy flag until it clears. Needs the R/W pin.
    BusyPoll,
}

// Minimum times from the HD44780 electrical specification. The power-on
// figures are lower bounds with no acknowledgement; sleeping longer is
// always fine.
const POWER_ON_WAIT: Duration = Duration::from_millis(15);
const BLIND_ATTEMPT_WAITS: [Duration; 3] = [
    Duration::from_micros(4100),
    Duration::from_micros(100),
    Duration::from_micros(41),
];
const MODE_SELECT_WAIT: Duration = Duration::from_micros(41);
// 37 us execution plus 4 us until the busy flag is readable again.
const INSTRUCTION_WAIT: Duration = Duration::from_micros(41);
// Clear and return-home run much longer than other instructions.
const CLEAR_WAIT: Duration = Duration::from_micros(1640);
// Datasheet minimum is 0.5 us; a whole microsecond keeps the math simple.
const E_PULSE_WIDTH: Duration = Duration::from_micros(1);
const E_REST: Duration = Duration::from_micros(1);

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(10);

const FUNCTION_SET: u8 = 0b0010_0000;
const FUNCTION_SET_8BIT: u8 = 0b0001_0000;
const FUNCTION_SET_TWO_LINES: u8 = 0b0000_1000;
const FUNCTION_SET_5X10: u8 = 0b0000_0100;

const BUSY_FLAG: u8 = 0b1000_0000;
const CLEAR_DISPLAY: u8 = 0b0000_0001;
const RETURN_HOME: u8 = 0b0000_0010;

/// HD44780 driver bit-banging GPIO pins.
///
/// Owns output handles for E and RS, optionally R/W, and the data bus.
/// Exclusive `&mut self` on every transfer keeps the bus serialized; the
/// controller has no queue, so two transfers must never overlap.
#[derive(Debug)]
pub struct GpioHd44780Driver<'a> {
    pin_e: &'a dyn GpioOutput,
    pin_rw: Option<&'a dyn GpioOutput>,
    pin_rs: &'a dyn GpioOutput,
    bus: DataBus<'a>,
    geometry: ScreenGeometry,
    settle: SettleMode,
    busy_timeout: Option<Duration>,
    mode_selected: bool,
}

impl<'a> GpioHd44780Driver<'a> {
    /// Creates a driver for a display wired with four data lines (DB7-DB4).
    ///
    /// Without `pin_rw` the display's R/W pin must be tied to ground and
    /// the driver settles with fixed delays.
    pub fn new_4bit(
        pin_e: &'a dyn GpioOutput,
        pin_rw: Option<&'a dyn GpioOutput>,
        pin_rs: &'a dyn GpioOutput,
        data_bus: &'a mut dyn GpioBus<4>,
        geometry: ScreenGeometry,
    ) -> Self {
        Self::new(pin_e, pin_rw, pin_rs, DataBus::Four(data_bus), geometry)
    }

    /// Creates a driver for a display wired with all eight data lines.
    pub fn new_8bit(
        pin_e: &'a dyn GpioOutput,
        pin_rw: Option<&'a dyn GpioOutput>,
        pin_rs: &'a dyn GpioOutput,
        data_bus: &'a mut dyn GpioBus<8>,
        geometry: ScreenGeometry,
    ) -> Self {
        Self::new(pin_e, pin_rw, pin_rs, DataBus::Eight(data_bus), geometry)
    }

    fn new(
        pin_e: &'a dyn GpioOutput,
        pin_rw: Option<&'a dyn GpioOutput>,
        pin_rs: &'a dyn GpioOutput,
        bus: DataBus<'a>,
        geometry: ScreenGeometry,
    ) -> Self {
        let settle = if pin_rw.is_some() {
            SettleMode::BusyPoll
        } else {
            SettleMode::FixedDelay
        };
        GpioHd44780Driver {
            pin_e,
            pin_rw,
            pin_rs,
            bus,
            geometry,
            settle,
            busy_timeout: Some(DEFAULT_BUSY_TIMEOUT),
            mode_selected: false,
        }
    }

    pub fn width(&self) -> BusWidth {
        self.bus.width()
    }

    pub fn settle_mode(&self) -> SettleMode {
        self.settle
    }

    /// Overrides the settle strategy chosen at construction.
    pub fn set_settle_mode(&mut self, mode: SettleMode) -> Hd44780Result<()> {
        if mode == SettleMode::BusyPoll && self.pin_rw.is_none() {
            return Err(Hd44780Error::Config(
                "busy-flag polling requires the R/W pin",
            ));
        }
        self.settle = mode;
        Ok(())
    }

    /// Deadline for one busy-flag wait. `None` polls forever, faithful to
    /// the original protocol: a stuck controller then blocks the caller
    /// indefinitely.
    pub fn set_busy_timeout(&mut self, timeout: Option<Duration>) {
        self.busy_timeout = timeout;
    }

    /// Strobes E once. The line is back low on every exit path, even when
    /// raising it failed; the next frame may rely on that rest state.
    fn pulse_e(pin_e: &dyn GpioOutput) -> GpioResult<()> {
        let raised = pin_e.write(true);
        sleep(E_PULSE_WIDTH);
        let lowered = pin_e.write(false);
        raised?;
        lowered?;
        sleep(E_REST);
        Ok(())
    }

    /// One logical transfer: RS per kind, R/W low, then one frame (8-bit)
    /// or two nibble frames, upper first (4-bit). RS is set once before
    /// the first pulse and held across both nibbles.
    fn emit(&mut self, byte: u8, kind: TransferKind) -> Hd44780Result<()> {
        trace!(
            "Sending {byte:#010b} ({kind:?}) over a {:?} bus",
            self.bus.width()
        );

        self.pin_rs.write(kind.rs_level())?;
        if let Some(pin_rw) = self.pin_rw {
            pin_rw.write(false)?;
        }

        match Frame::encode(byte, self.bus.width()) {
            Frame::Byte(pattern) => {
                let DataBus::Eight(bus) = &mut self.bus else {
                    return Err(Hd44780Error::Config("byte frame on a 4-bit bus"));
                };
                bus.as_output()?.write_byte(pattern)?;
                Self::pulse_e(self.pin_e)?;
            }
            Frame::Nibbles { upper, lower } => {
                let DataBus::Four(bus) = &mut self.bus else {
                    return Err(Hd44780Error::Config("nibble frames on an 8-bit bus"));
                };
                let output = bus.as_output()?;
                output.write_nibble(upper)?;
                Self::pulse_e(self.pin_e)?;
                output.write_nibble(lower)?;
                Self::pulse_e(self.pin_e)?;
            }
        }

        Ok(())
    }

    /// Emits a single synchronization frame during the power-on handshake:
    /// the upper nibble of `pattern` alone on a 4-bit bus, the whole byte
    /// on an 8-bit one.
    fn emit_sync(&mut self, pattern: u8) -> Hd44780Result<()> {
        trace!("Sync frame {pattern:#04x}");

        self.pin_rs.write(false)?;
        if let Some(pin_rw) = self.pin_rw {
            pin_rw.write(false)?;
        }

        match &mut self.bus {
            DataBus::Four(bus) => bus.as_output()?.write_nibble(pattern >> 4)?,
            DataBus::Eight(bus) => bus.as_output()?.write_byte(pattern)?,
        }
        Self::pulse_e(self.pin_e)?;

        Ok(())
    }

    /// Waits for a transfer to finish, by busy flag or by worst-case sleep.
    ///
    /// Fixed delays are always used until the interface width has been
    /// selected; before that the controller is still in its power-on 8-bit
    /// mode and a read through a 4-bit bus would come back misframed.
    fn settle(&mut self, fixed_wait: Duration) -> Hd44780Result<()> {
        if self.settle == SettleMode::BusyPoll && self.mode_selected {
            self.wait_until_ready()
        } else {
            sleep(fixed_wait);
            Ok(())
        }
    }

    fn send(&mut self, byte: u8, kind: TransferKind) -> Hd44780Result<()> {
        self.emit(byte, kind)?;
        let fixed_wait = match kind {
            TransferKind::Instruction
                if byte == CLEAR_DISPLAY || byte & !0b1 == RETURN_HOME =>
            {
                CLEAR_WAIT
            }
            _ => INSTRUCTION_WAIT,
        };
        self.settle(fixed_wait)
    }

    /// Strobes E once around a nibble sample. As with writes, E ends low
    /// no matter how the read went.
    fn strobe_read_nibble(
        input: &dyn GpioBusInput<4>,
        pin_e: &dyn GpioOutput,
    ) -> Hd44780Result<u8> {
        pin_e.write(true)?;
        sleep(E_PULSE_WIDTH);
        let nibble = input.read_nibble();
        let lowered = pin_e.write(false);
        sleep(E_REST);
        let nibble = nibble?;
        lowered?;
        Ok(nibble)
    }

    /// Samples one status byte with the bus turned around to input. On a
    /// 4-bit bus that is two strobes, upper nibble then lower; the lower
    /// one carries address-counter bits and must be clocked out even when
    /// only the busy bit matters.
    fn sample_status(bus: &mut DataBus, pin_e: &dyn GpioOutput) -> Hd44780Result<u8> {
        match bus {
            DataBus::Eight(bus) => {
                if bus.supports_bias() {
                    bus.set_bias(GpioBias::PullUp)?;
                }
                let input = bus.as_input()?;
                pin_e.write(true)?;
                sleep(E_PULSE_WIDTH);
                let byte = input.read_byte();
                let lowered = pin_e.write(false);
                sleep(E_REST);
                lowered?;
                Ok(byte?)
            }
            DataBus::Four(bus) => {
                if bus.supports_bias() {
                    bus.set_bias(GpioBias::PullUp)?;
                }
                let input = bus.as_input()?;
                let upper = Self::strobe_read_nibble(&*input, pin_e)?;
                let lower = Self::strobe_read_nibble(&*input, pin_e)?;
                Ok((upper << 4) | lower)
            }
        }
    }

    /// Puts the data lines back under our control after a read.
    fn restore_output(bus: &mut DataBus) -> GpioResult<()> {
        match bus {
            DataBus::Four(bus) => {
                if bus.supports_bias() {
                    bus.set_bias(GpioBias::None)?;
                }
                bus.as_output()?;
            }
            DataBus::Eight(bus) => {
                if bus.supports_bias() {
                    bus.set_bias(GpioBias::None)?;
                }
                bus.as_output()?;
            }
        }
        Ok(())
    }

    /// Polls the busy flag until the controller is idle.
    ///
    /// Turn-around discipline: bus to input with pull-ups, RS low, R/W
    /// high, strobe-and-sample until bit 7 clears, then R/W low and bus
    /// back to output. The restore half runs on every exit path — error,
    /// timeout or success — so the bus is never left as an input fighting
    /// the controller.
    pub fn wait_until_ready(&mut self) -> Hd44780Result<()> {
        let Some(pin_rw) = self.pin_rw else {
            return Err(Hd44780Error::Config(
                "busy-flag polling requires the R/W pin",
            ));
        };
        if !self.mode_selected {
            return Err(Hd44780Error::Config(
                "busy-flag polling before the interface width is selected",
            ));
        }

        let deadline = self.busy_timeout.map(|timeout| Instant::now() + timeout);

        self.pin_rs.write(false)?;
        pin_rw.write(true)?;

        let polled = loop {
            match Self::sample_status(&mut self.bus, self.pin_e) {
                Ok(status) if status & BUSY_FLAG == 0 => break Ok(()),
                Ok(_) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        break Err(Hd44780Error::BusyFlagTimeout);
                    }
                }
                Err(err) => break Err(err),
            }
        };

        let rw_cleared = pin_rw.write(false);
        let restored = Self::restore_output(&mut self.bus);
        polled?;
        rw_cleared?;
        restored?;
        Ok(())
    }

    /// Brings the controller from its undefined power-on state into the
    /// configured width, geometry and font, leaving the display cleared
    /// and off with the cursor at home.
    ///
    /// The three leading attempts are open-loop by the controller's
    /// specification: its power-on state is unknown, nothing acknowledges
    /// them, and correctness rests entirely on the wait lower bounds. They
    /// are sent unconditionally every time, and a dead controller still
    /// lets this function "succeed" — there is no feedback channel to
    /// observe the failure through.
    pub fn init(&mut self, font: Font) -> Hd44780Result<()> {
        trace!("Initializing, {:?} bus, {:?}", self.bus.width(), font);

        self.mode_selected = false;

        // Supply stabilization, no bus activity allowed yet.
        sleep(POWER_ON_WAIT);

        for wait in BLIND_ATTEMPT_WAITS {
            self.emit_sync(FUNCTION_SET | FUNCTION_SET_8BIT)?;
            sleep(wait);
        }

        if self.bus.width() == BusWidth::FourBit {
            // One lone nibble: the controller is still framing 8-bit, so
            // this is a complete "function set, 4-bit" instruction to it.
            self.emit_sync(FUNCTION_SET)?;
            sleep(MODE_SELECT_WAIT);
        }

        // Width is committed; busy-flag reads are meaningful from here on.
        self.mode_selected = true;

        let mut function_set = FUNCTION_SET;
        if self.bus.width() == BusWidth::EightBit {
            function_set |= FUNCTION_SET_8BIT;
        }
        if self.geometry.rows >= 2 {
            function_set |= FUNCTION_SET_TWO_LINES;
        }
        if font == Font::FiveByTen {
            function_set |= FUNCTION_SET_5X10;
        }
        self.send_instruction(function_set)?;

        self.set_display_control(false, false, false)?;
        self.clear_display()?;
        self.set_entry_mode(CursorDirection::Right, false)?;

        Ok(())
    }
}

impl Hd44780Driver for GpioHd44780Driver<'_> {
    fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    fn send_instruction(&mut self, instruction: u8) -> Hd44780Result<()> {
        self.send(instruction, TransferKind::Instruction)
    }

    fn send_data(&mut self, data: u8) -> Hd44780Result<()> {
        self.send(data, TransferKind::Data)
    }

    fn read_status(&mut self) -> Hd44780Result<u8> {
        let Some(pin_rw) = self.pin_rw else {
            return Err(Hd44780Error::Config("status reads require the R/W pin"));
        };
        if !self.mode_selected {
            return Err(Hd44780Error::Config(
                "status reads before the interface width is selected",
            ));
        }

        self.pin_rs.write(false)?;
        pin_rw.write(true)?;

        let sampled = Self::sample_status(&mut self.bus, self.pin_e);

        let rw_cleared = pin_rw.write(false);
        let restored = Self::restore_output(&mut self.bus);
        let status = sampled?;
        rw_cleared?;
        restored?;

        trace!("Status {status:#010b}");
        Ok(status)
    }
}
