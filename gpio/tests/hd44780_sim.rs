//! Drives the HD44780 driver against a simulated controller.
//!
//! The simulator models the parts of the real chip the protocol depends
//! on: it latches a frame on every falling E edge, keeps its own idea of
//! the interface width (8-bit after power-on, 4-bit only once a lone
//! `0010` nibble arrives), pairs nibbles in 4-bit mode, tracks the DDRAM
//! address counter, and answers busy-flag reads from a configurable poll
//! budget.

use pilcd_gpio::lcd::hd44780::driver::{
    CursorDirection, Font, GpioHd44780Driver, Hd44780Driver, ScreenGeometry, SettleMode,
    ShiftTarget,
};
use pilcd_gpio::lcd::hd44780::Hd44780Error;
use pilcd_gpio::soft::SoftGpioBus;
use pilcd_gpio::{
    GpioBias, GpioBus, GpioBusInput, GpioBusOutput, GpioError, GpioInput, GpioOutput, GpioPin,
    GpioResult,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    /// One latched write frame: a nibble on a 4-line bus, a byte on an
    /// 8-line one.
    Frame { rs: bool, pattern: u8 },
    /// One complete busy/address status read, with the busy level it saw.
    StatusSample { busy: bool },
    BusInput,
    BusOutput,
}

#[derive(Debug)]
struct SimLcd {
    wired: u8,
    e: bool,
    rs: bool,
    rw: bool,
    lines: u8,
    input_mask: u8,
    bias: GpioBias,

    four_bit_mode: bool,
    pending_upper: Option<u8>,
    ddram_addr: u8,
    written: Vec<(u8, u8)>,
    /// Status samples an instruction stays busy for.
    busy_cost: u32,
    busy_budget: u32,
    read_phase_upper: bool,

    events: Vec<Event>,
}

impl SimLcd {
    fn new(wired: u8, busy_cost: u32) -> Self {
        assert!(wired == 4 || wired == 8);
        SimLcd {
            wired,
            e: false,
            rs: false,
            rw: false,
            lines: 0,
            input_mask: 0,
            bias: GpioBias::None,
            four_bit_mode: false,
            pending_upper: None,
            ddram_addr: 0,
            written: Vec::new(),
            busy_cost,
            busy_budget: 0,
            read_phase_upper: true,
            events: Vec::new(),
        }
    }

    fn full_mask(&self) -> u8 {
        u8::MAX >> (8 - self.wired)
    }

    fn is_input(&self) -> bool {
        self.input_mask == self.full_mask()
    }

    fn set_input_mask(&mut self, mask: u8) {
        let was_input = self.is_input();
        self.input_mask = mask;
        let now_input = self.is_input();
        if now_input && !was_input {
            self.read_phase_upper = true;
            self.events.push(Event::BusInput);
        } else if was_input && !now_input {
            self.events.push(Event::BusOutput);
        }
    }

    fn write_control(&mut self, role: Role, value: bool) {
        match role {
            Role::RegisterSelect => self.rs = value,
            Role::ReadWrite => self.rw = value,
            Role::Enable => {
                let rising = value && !self.e;
                let falling = !value && self.e;
                self.e = value;
                if rising {
                    self.on_e_rise();
                }
                if falling {
                    self.on_e_fall();
                }
            }
        }
    }

    fn status(&self) -> u8 {
        let busy = if self.busy_budget > 0 { 0x80 } else { 0 };
        busy | (self.ddram_addr & 0x7f)
    }

    /// A read strobe: the controller drives the bus while E is high.
    fn on_e_rise(&mut self) {
        if !(self.rw && self.is_input()) {
            return;
        }
        let status = self.status();
        self.lines = if self.wired == 8 {
            status
        } else if self.read_phase_upper {
            status >> 4
        } else {
            status & 0x0f
        };
    }

    fn on_e_fall(&mut self) {
        if self.rw {
            if self.is_input() {
                self.complete_status_phase();
            }
        } else if !self.is_input() {
            self.latch();
        }
    }

    fn complete_status_phase(&mut self) {
        if self.wired == 4 && self.read_phase_upper {
            self.read_phase_upper = false;
            return;
        }
        self.read_phase_upper = true;
        self.events.push(Event::StatusSample {
            busy: self.status() & 0x80 != 0,
        });
        if self.busy_budget > 0 {
            self.busy_budget -= 1;
        }
    }

    fn latch(&mut self) {
        if self.wired == 8 {
            let byte = self.lines;
            self.events.push(Event::Frame {
                rs: self.rs,
                pattern: byte,
            });
            self.execute(self.rs, byte);
            return;
        }

        let nibble = self.lines & 0x0f;
        self.events.push(Event::Frame {
            rs: self.rs,
            pattern: nibble,
        });

        if !self.four_bit_mode {
            // Still framing 8-bit: the four wired lines are DB7-DB4, the
            // floating low half does not matter for function set.
            self.execute(self.rs, nibble << 4);
        } else {
            match self.pending_upper.take() {
                None => self.pending_upper = Some(nibble),
                Some(upper) => {
                    let byte = (upper << 4) | nibble;
                    self.execute(self.rs, byte);
                }
            }
        }
    }

    fn execute(&mut self, rs: bool, byte: u8) {
        if rs {
            self.written.push((self.ddram_addr, byte));
            self.ddram_addr = (self.ddram_addr + 1) & 0x7f;
        } else if byte & 0b1110_0000 == 0b0010_0000 {
            // Function set.
            self.four_bit_mode = byte & 0b0001_0000 == 0;
            self.pending_upper = None;
        } else if byte == 0b0000_0001 || byte & !0b1 == 0b0000_0010 {
            // Clear display / return home.
            self.ddram_addr = 0;
        } else if byte & 0b1000_0000 != 0 {
            self.ddram_addr = byte & 0x7f;
        } else if byte & 0b1111_0000 == 0b0001_0000 && byte & 0b0000_1000 == 0 {
            // Cursor shift.
            if byte & 0b0000_0100 != 0 {
                self.ddram_addr = (self.ddram_addr + 1) & 0x7f;
            } else {
                self.ddram_addr = self.ddram_addr.wrapping_sub(1) & 0x7f;
            }
        }
        self.busy_budget = self.busy_cost;
    }

    fn frames(&self) -> Vec<(bool, u8)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Frame { rs, pattern } => Some((*rs, *pattern)),
                _ => None,
            })
            .collect()
    }

    fn status_samples(&self) -> Vec<bool> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::StatusSample { busy } => Some(*busy),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Enable,
    RegisterSelect,
    ReadWrite,
}

#[derive(Debug, Clone)]
struct SimPin {
    lcd: Rc<RefCell<SimLcd>>,
    role: Role,
}

impl SimPin {
    fn new(lcd: &Rc<RefCell<SimLcd>>, role: Role) -> Self {
        SimPin {
            lcd: lcd.clone(),
            role,
        }
    }
}

impl GpioOutput for SimPin {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.lcd.borrow_mut().write_control(self.role, value);
        Ok(())
    }
}

#[derive(Debug)]
struct SimDataBus<const N: usize> {
    lcd: Rc<RefCell<SimLcd>>,
}

impl<const N: usize> SimDataBus<N> {
    fn new(lcd: &Rc<RefCell<SimLcd>>) -> Self {
        SimDataBus { lcd: lcd.clone() }
    }
}

impl<const N: usize> GpioBus<N> for SimDataBus<N> {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioBusInput<N> + '_>> {
        let mut lcd = self.lcd.borrow_mut();
        let mask = lcd.full_mask();
        lcd.set_input_mask(mask);
        drop(lcd);
        Ok(Box::new(SimBusHandle::<N> {
            lcd: self.lcd.clone(),
        }))
    }

    fn as_output(&mut self) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>> {
        self.lcd.borrow_mut().set_input_mask(0);
        Ok(Box::new(SimBusHandle::<N> {
            lcd: self.lcd.clone(),
        }))
    }

    fn supports_bias(&self) -> bool {
        true
    }

    fn bias(&self) -> GpioBias {
        self.lcd.borrow().bias
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        self.lcd.borrow_mut().bias = bias;
        Ok(())
    }
}

#[derive(Debug)]
struct SimBusHandle<const N: usize> {
    lcd: Rc<RefCell<SimLcd>>,
}

impl<const N: usize> GpioBusInput<N> for SimBusHandle<N> {
    fn read(&self) -> GpioResult<[bool; N]> {
        let lines = self.lcd.borrow().lines;
        let mut values = [false; N];
        for (i, value) in values.iter_mut().enumerate() {
            *value = lines & (1 << i) != 0;
        }
        Ok(values)
    }
}

impl<const N: usize> GpioBusOutput<N> for SimBusHandle<N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        let mut lines = 0u8;
        for (i, &value) in values.iter().enumerate() {
            if value {
                lines |= 1 << i;
            }
        }
        self.lcd.borrow_mut().lines = lines;
        Ok(())
    }
}

/// One data line as an individually-owned pin, for the soft-bus test.
#[derive(Debug)]
struct SimLinePin {
    lcd: Rc<RefCell<SimLcd>>,
    bit: u8,
}

impl SimLinePin {
    fn new(lcd: &Rc<RefCell<SimLcd>>, bit: u8) -> Self {
        SimLinePin {
            lcd: lcd.clone(),
            bit,
        }
    }
}

impl GpioPin for SimLinePin {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioInput + '_>> {
        let mut lcd = self.lcd.borrow_mut();
        let mask = lcd.input_mask | (1 << self.bit);
        lcd.set_input_mask(mask);
        drop(lcd);
        Ok(Box::new(SimLineHandle {
            lcd: self.lcd.clone(),
            bit: self.bit,
        }))
    }

    fn as_output(&mut self) -> GpioResult<Box<dyn GpioOutput + '_>> {
        let mut lcd = self.lcd.borrow_mut();
        let mask = lcd.input_mask & !(1 << self.bit);
        lcd.set_input_mask(mask);
        drop(lcd);
        Ok(Box::new(SimLineHandle {
            lcd: self.lcd.clone(),
            bit: self.bit,
        }))
    }

    fn supports_bias(&self) -> bool {
        true
    }

    fn bias(&self) -> GpioBias {
        self.lcd.borrow().bias
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        self.lcd.borrow_mut().bias = bias;
        Ok(())
    }
}

#[derive(Debug)]
struct SimLineHandle {
    lcd: Rc<RefCell<SimLcd>>,
    bit: u8,
}

impl GpioInput for SimLineHandle {
    fn read(&self) -> GpioResult<bool> {
        Ok(self.lcd.borrow().lines & (1 << self.bit) != 0)
    }
}

impl GpioOutput for SimLineHandle {
    fn write(&self, value: bool) -> GpioResult<()> {
        let mut lcd = self.lcd.borrow_mut();
        if value {
            lcd.lines |= 1 << self.bit;
        } else {
            lcd.lines &= !(1 << self.bit);
        }
        Ok(())
    }
}

/// An E pin that refuses to rise, for the mid-pulse abort property.
#[derive(Debug, Default)]
struct StuckLowPin {
    level: Cell<bool>,
    low_writes: Cell<u32>,
}

impl GpioOutput for StuckLowPin {
    fn write(&self, value: bool) -> GpioResult<()> {
        if value {
            return Err(GpioError::Other("line driver fault".into()));
        }
        self.level.set(false);
        self.low_writes.set(self.low_writes.get() + 1);
        Ok(())
    }
}

const GEOMETRY: ScreenGeometry = ScreenGeometry::new(16, 2);

#[test]
fn init_4bit_sends_three_blind_attempts_then_mode_select() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();

    let lcd = lcd.borrow();
    // Blind attempts, mode select, function set 0x28, display off 0x08,
    // clear 0x01, entry mode 0x06 — all instruction frames.
    let expected: Vec<(bool, u8)> = [0x3, 0x3, 0x3, 0x2, 0x2, 0x8, 0x0, 0x8, 0x0, 0x1, 0x0, 0x6]
        .into_iter()
        .map(|pattern| (false, pattern))
        .collect();
    assert_eq!(lcd.frames(), expected);
    assert!(lcd.four_bit_mode);
    assert_eq!(lcd.ddram_addr, 0);
    assert!(!lcd.e);
}

#[test]
fn init_8bit_sends_three_blind_bytes_and_no_mode_select() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(8, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<8>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_8bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();

    let lcd = lcd.borrow();
    let expected: Vec<(bool, u8)> = [0x30, 0x30, 0x30, 0x38, 0x08, 0x01, 0x06]
        .into_iter()
        .map(|pattern| (false, pattern))
        .collect();
    assert_eq!(lcd.frames(), expected);
    assert!(!lcd.four_bit_mode);
}

#[test]
fn four_bit_transfer_emits_upper_nibble_before_lower() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();
    lcd.borrow_mut().events.clear();

    driver.send_instruction(0x28).unwrap();

    assert_eq!(lcd.borrow().frames(), vec![(false, 0x2), (false, 0x8)]);
}

#[test]
fn eight_bit_data_is_a_single_frame() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(8, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<8>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_8bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();
    lcd.borrow_mut().events.clear();

    driver.send_data(0x41).unwrap();

    let lcd = lcd.borrow();
    assert_eq!(lcd.frames(), vec![(true, 0x41)]);
    assert_eq!(lcd.written, vec![(0x00, 0x41)]);
}

#[test]
fn clear_display_resets_the_address_counter() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();

    driver.write_str("HI").unwrap();
    assert_eq!(lcd.borrow().ddram_addr, 2);

    driver.clear_display().unwrap();

    // Address 0 is row 0, column 0.
    assert_eq!(lcd.borrow().ddram_addr, 0);
    assert_eq!(GEOMETRY.ddram_address(0, 0), Some(0));
}

#[test]
fn positioning_and_writes_move_the_address_counter() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();

    driver.set_position(5, 1).unwrap();
    assert_eq!(lcd.borrow().ddram_addr, 0x45);

    driver.write_str("OK").unwrap();
    assert_eq!(lcd.borrow().written, vec![(0x45, b'O'), (0x46, b'K')]);
    assert_eq!(lcd.borrow().ddram_addr, 0x47);

    driver.shift(ShiftTarget::Cursor, CursorDirection::Left).unwrap();
    assert_eq!(lcd.borrow().ddram_addr, 0x46);
}

#[test]
fn positions_outside_the_geometry_are_rejected_before_the_bus() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();
    lcd.borrow_mut().events.clear();

    assert_eq!(driver.set_position(16, 0), Err(Hd44780Error::InvalidPosition));
    assert_eq!(driver.set_position(0, 2), Err(Hd44780Error::InvalidPosition));
    assert!(lcd.borrow().frames().is_empty());
}

#[test]
fn busy_poll_samples_until_the_flag_clears() {
    // Three busy samples before the flag clears: four samples total.
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 3)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let pin_rw = SimPin::new(&lcd, Role::ReadWrite);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver =
        GpioHd44780Driver::new_4bit(&pin_e, Some(&pin_rw), &pin_rs, &mut bus, GEOMETRY);
    assert_eq!(driver.settle_mode(), SettleMode::BusyPoll);
    driver.init(Font::FiveByEight).unwrap();
    lcd.borrow_mut().events.clear();

    driver.send_instruction(0x06).unwrap();

    let lcd = lcd.borrow();
    assert_eq!(lcd.status_samples(), vec![true, true, true, false]);
    // Direction turned around exactly once, and ended as output.
    assert_eq!(
        lcd.events
            .iter()
            .filter(|event| matches!(event, Event::BusInput | Event::BusOutput))
            .cloned()
            .collect::<Vec<_>>(),
        vec![Event::BusInput, Event::BusOutput]
    );
    assert!(!lcd.is_input());
    assert!(!lcd.rw);
    assert!(!lcd.e);
}

#[test]
fn busy_poll_with_an_idle_controller_samples_once() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(8, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let pin_rw = SimPin::new(&lcd, Role::ReadWrite);
    let mut bus = SimDataBus::<8>::new(&lcd);

    let mut driver =
        GpioHd44780Driver::new_8bit(&pin_e, Some(&pin_rw), &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();
    lcd.borrow_mut().events.clear();

    driver.send_data(b'A').unwrap();

    assert_eq!(lcd.borrow().status_samples(), vec![false]);
}

#[test]
fn stuck_busy_flag_times_out_and_releases_the_bus() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, u32::MAX)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let pin_rw = SimPin::new(&lcd, Role::ReadWrite);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver =
        GpioHd44780Driver::new_4bit(&pin_e, Some(&pin_rw), &pin_rs, &mut bus, GEOMETRY);
    // Init with fixed delays so only the transfer under test polls.
    driver.set_settle_mode(SettleMode::FixedDelay).unwrap();
    driver.init(Font::FiveByEight).unwrap();
    driver.set_settle_mode(SettleMode::BusyPoll).unwrap();
    driver.set_busy_timeout(Some(Duration::from_millis(5)));

    let result = driver.send_instruction(0x06);

    assert_eq!(result, Err(Hd44780Error::BusyFlagTimeout));
    let lcd = lcd.borrow();
    // Even on the timeout path the bus ends up driven by us again.
    assert!(!lcd.is_input());
    assert!(!lcd.rw);
    assert!(!lcd.e);
}

#[test]
fn busy_polling_needs_the_rw_pin() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);
    assert_eq!(driver.settle_mode(), SettleMode::FixedDelay);

    assert!(matches!(
        driver.set_settle_mode(SettleMode::BusyPoll),
        Err(Hd44780Error::Config(_))
    ));
    assert!(matches!(
        driver.wait_until_ready(),
        Err(Hd44780Error::Config(_))
    ));
}

#[test]
fn status_reads_before_mode_select_are_rejected() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let pin_rw = SimPin::new(&lcd, Role::ReadWrite);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver =
        GpioHd44780Driver::new_4bit(&pin_e, Some(&pin_rw), &pin_rs, &mut bus, GEOMETRY);

    assert!(matches!(
        driver.read_status(),
        Err(Hd44780Error::Config(_))
    ));
}

#[test]
fn status_read_reports_busy_flag_and_address() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let pin_rw = SimPin::new(&lcd, Role::ReadWrite);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver =
        GpioHd44780Driver::new_4bit(&pin_e, Some(&pin_rw), &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();
    driver.set_position(3, 1).unwrap();

    let (busy, address) = driver.busy_flag_and_address().unwrap();

    assert!(!busy);
    assert_eq!(address, 0x43);
}

#[test]
fn aborted_enable_pulse_leaves_the_line_low() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 0)));
    let pin_e = StuckLowPin::default();
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let mut bus = SimDataBus::<4>::new(&lcd);

    let mut driver = GpioHd44780Driver::new_4bit(&pin_e, None, &pin_rs, &mut bus, GEOMETRY);

    let result = driver.send_instruction(0x01);

    assert!(matches!(result, Err(Hd44780Error::Gpio(_))));
    // The failed rise was still followed by a drive-low.
    assert!(!pin_e.level.get());
    assert!(pin_e.low_writes.get() >= 1);
}

#[test]
fn soft_bus_from_single_pins_carries_a_full_init_and_busy_poll() {
    let lcd = Rc::new(RefCell::new(SimLcd::new(4, 1)));
    let pin_e = SimPin::new(&lcd, Role::Enable);
    let pin_rs = SimPin::new(&lcd, Role::RegisterSelect);
    let pin_rw = SimPin::new(&lcd, Role::ReadWrite);

    let mut line0 = SimLinePin::new(&lcd, 0);
    let mut line1 = SimLinePin::new(&lcd, 1);
    let mut line2 = SimLinePin::new(&lcd, 2);
    let mut line3 = SimLinePin::new(&lcd, 3);
    let mut bus = SoftGpioBus::new([
        &mut line0 as &mut dyn GpioPin,
        &mut line1,
        &mut line2,
        &mut line3,
    ]);

    let mut driver =
        GpioHd44780Driver::new_4bit(&pin_e, Some(&pin_rw), &pin_rs, &mut bus, GEOMETRY);
    driver.init(Font::FiveByEight).unwrap();
    driver.write_str("OK").unwrap();

    let lcd = lcd.borrow();
    assert!(lcd.four_bit_mode);
    assert_eq!(lcd.frames()[..4], [(false, 0x3), (false, 0x3), (false, 0x3), (false, 0x2)]);
    assert_eq!(lcd.written, vec![(0x00, b'O'), (0x01, b'K')]);
    // Every settle after mode select polled the busy flag once-busy, once-clear.
    assert!(lcd.status_samples().chunks(2).all(|pair| pair == [true, false]));
    assert!(!lcd.is_input());
}
