pub mod gpiod;
pub mod lcd;
pub mod raw;
pub mod soft;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO pins available.
    fn count(&self) -> GpioResult<usize>;

    /// Gets the GPIO pin at the given index.
    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>>;

    /// Gets the GPIO pin bus at the specific indices.
    fn get_pin_bus<const N: usize>(
        &self,
        indices: [usize; N],
    ) -> GpioResult<Box<dyn GpioBus<N> + '_>>;
}

/// Specifies the bias of a GPIO pin.
///
/// Pull-up or pull-down resistors keep a line at a defined level while
/// nothing drives it. Reading a bus that the other side has just released
/// needs this, otherwise the sample comes from a floating line.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default]
    None,
    PullUp,
    PullDown,
}

/// A single GPIO pin whose direction has not been decided yet.
///
/// The only way to read or write the pin is to first commit it to a
/// direction with [`GpioPin::as_input`] or [`GpioPin::as_output`]; the
/// returned handle borrows the pin, so the direction cannot change behind
/// its back.
pub trait GpioPin: Debug {
    /// Sets the GPIO pin function to input, allowing reading its state.
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioInput + '_>>;
    /// Sets the GPIO pin function to output, allowing writing its state.
    fn as_output(&mut self) -> GpioResult<Box<dyn GpioOutput + '_>>;

    /// Gets whether the GPIO pin supports bias (pull-up/pull-down resistors).
    fn supports_bias(&self) -> bool {
        false
    }
    /// Gets the bias of the GPIO pin.
    fn bias(&self) -> GpioBias {
        GpioBias::None
    }
    /// Sets the bias of the GPIO pin.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support bias.
    fn set_bias(&mut self, _bias: GpioBias) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }
    fn with_bias(mut self, bias: GpioBias) -> GpioResult<Self>
    where
        Self: Sized,
    {
        self.set_bias(bias)?;
        Ok(self)
    }
}

pub trait GpioInput: Debug {
    /// Reads the state of the GPIO pin.
    fn read(&self) -> GpioResult<bool>;
}

pub trait GpioOutput: Debug {
    /// Writes the state of the GPIO pin.
    fn write(&self, value: bool) -> GpioResult<()>;
}

/// N GPIO pins treated as one parallel bus.
///
/// Like [`GpioPin`], the bus commits to a direction through
/// [`GpioBus::as_input`]/[`GpioBus::as_output`] and hands back a typed
/// handle. All pins switch together; a half-turned bus is not
/// representable.
pub trait GpioBus<const N: usize>: Debug {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioBusInput<N> + '_>>;
    fn as_output(&mut self) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>>;

    fn supports_bias(&self) -> bool {
        false
    }
    fn bias(&self) -> GpioBias {
        GpioBias::None
    }
    fn set_bias(&mut self, _bias: GpioBias) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }
    fn with_bias(mut self, bias: GpioBias) -> GpioResult<Self>
    where
        Self: Sized,
    {
        self.set_bias(bias)?;
        Ok(self)
    }
}

pub trait GpioBusInput<const N: usize>: Debug {
    fn read(&self) -> GpioResult<[bool; N]>;
}

impl dyn GpioBusInput<8> + '_ {
    /// Reads the values of the GPIO pins in the bus.
    /// Returns them as a byte, LSb first.
    pub fn read_byte(&self) -> GpioResult<u8> {
        let values = self.read()?;
        let mut byte = 0u8;
        for (i, &value) in values.iter().enumerate() {
            if value {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }
}

impl dyn GpioBusInput<4> + '_ {
    /// Reads the values of the GPIO pins in the bus.
    /// Returns them as a nibble, LSb first.
    pub fn read_nibble(&self) -> GpioResult<u8> {
        let values = self.read()?;
        let mut nibble = 0u8;
        for (i, &value) in values.iter().enumerate() {
            if value {
                nibble |= 1 << i;
            }
        }
        Ok(nibble)
    }
}

pub trait GpioBusOutput<const N: usize>: Debug {
    fn write(&self, values: &[bool; N]) -> GpioResult<()>;
}

impl dyn GpioBusOutput<8> + '_ {
    /// Writes the values to the GPIO pins in the bus.
    /// The values are written as a byte, LSb first.
    pub fn write_byte(&self, value: u8) -> GpioResult<()> {
        let mut values = [false; 8];
        for (i, slot) in values.iter_mut().enumerate() {
            *slot = (value & (1 << i)) != 0;
        }
        self.write(&values)
    }
}

impl dyn GpioBusOutput<4> + '_ {
    /// Writes the values to the GPIO pins in the bus.
    /// The values are written as a nibble, LSb first.
    pub fn write_nibble(&self, value: u8) -> GpioResult<()> {
        if value > 0b1111 {
            return Err(GpioError::InvalidArgument);
        }

        let mut values = [false; 4];
        for (i, slot) in values.iter_mut().enumerate() {
            *slot = (value & (1 << i)) != 0;
        }
        self.write(&values)
    }
}
