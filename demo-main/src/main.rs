use dotenv::dotenv;
use gpiod::Chip;
use log::{debug, info};
use pilcd_gpio::GpioDriver;
use pilcd_gpio::gpiod::GpiodDriver;
use pilcd_gpio::lcd::hd44780::driver::{
    CursorDirection, Font, GpioHd44780Driver, Hd44780Driver, ScreenGeometry, ShiftTarget,
};
use pilcd_gpio::raw::RawGpioDriver;
use std::env::var;
use std::thread::sleep;
use std::time::Duration;
use sysinfo::System;

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!(
        "Hello, {}!",
        System::name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!(
        "System ver {} kernel ver {}",
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );
    info!("Architecture {}", System::cpu_arch());

    let backend = var("PILCD_BACKEND").unwrap_or_else(|_| "gpiomem".to_string());
    debug!("Initializing GPIO backend {backend:?}...");

    match backend.as_str() {
        "gpiomem" => run(&RawGpioDriver::new_gpiomem()?),
        "mem" => run(&RawGpioDriver::new_mem()?),
        "gpiod" => {
            let chip_path = var("PILCD_GPIOCHIP").unwrap_or_else(|_| "/dev/gpiochip0".to_string());
            run(&GpiodDriver::new(Chip::new(chip_path)?))
        }
        other => Err(eyre::eyre!("Unknown GPIO backend {other:?}")),
    }
}

fn run(gpio: &impl GpioDriver) -> eyre::Result<()> {
    debug!("{:?} initialized.", gpio);

    // Get pin numbers from env
    let e_pin_no: usize = var("PILCD_PIN_E")?.parse()?;
    let rs_pin_no: usize = var("PILCD_PIN_RS")?.parse()?;
    // R/W is optional; leave it unset when the display pin is tied to ground.
    let rw_pin_no: Option<usize> = var("PILCD_PIN_RW").ok().map(|s| s.parse()).transpose()?;
    // 4-bit data bus - DB4 DB5 DB6 DB7
    let data_pin_nos: [usize; 4] = parse_pin_bus(&var("PILCD_PINS_DATA")?)?;

    info!(
        "LCD @ E: {}, RS: {}, RW: {:?}, Data: {:?}",
        e_pin_no, rs_pin_no, rw_pin_no, data_pin_nos
    );

    let mut pin_e = gpio.get_pin(e_pin_no)?;
    let pin_e_out = pin_e.as_output()?;
    let mut pin_rs = gpio.get_pin(rs_pin_no)?;
    let pin_rs_out = pin_rs.as_output()?;
    let mut pin_rw = rw_pin_no.map(|no| gpio.get_pin(no)).transpose()?;
    let pin_rw_out = pin_rw.as_mut().map(|pin| pin.as_output()).transpose()?;
    let mut data_bus = gpio.get_pin_bus(data_pin_nos)?;

    let mut lcd = GpioHd44780Driver::new_4bit(
        &*pin_e_out,
        pin_rw_out.as_deref(),
        &*pin_rs_out,
        &mut *data_bus,
        ScreenGeometry::default(),
    );

    debug!("Initializing LCD ({:?} settle)...", lcd.settle_mode());
    lcd.init(Font::FiveByEight)?;
    lcd.set_display_control(true, false, false)?;

    lcd.write_str("Hello, world!")?;
    const LAST_LINE: &str = concat!("pilcd v", env!("CARGO_PKG_VERSION"));
    lcd.set_position(0, 1)?;
    lcd.write_str(LAST_LINE)?;

    info!("LCD initialized.");

    sleep(Duration::from_secs(2));

    loop {
        for _ in 0..4 {
            lcd.shift(ShiftTarget::Display, CursorDirection::Left)?;
            sleep(Duration::from_millis(300));
        }
        for _ in 0..4 {
            lcd.shift(ShiftTarget::Display, CursorDirection::Right)?;
            sleep(Duration::from_millis(300));
        }
    }
}
