//! Software bus combinator.
//!
//! Builds a [`GpioBus`] out of N independently-owned [`GpioPin`]s, for
//! setups where the bus lines do not come from one driver (or one driver
//! call), such as mixed backends or test doubles.

use crate::{
    GpioBias, GpioBus, GpioBusInput, GpioBusOutput, GpioError, GpioInput, GpioOutput, GpioPin,
    GpioResult,
};
use std::fmt::Debug;

pub struct SoftGpioBus<'a, const N: usize> {
    pins: [&'a mut dyn GpioPin; N],
}

impl<'a, const N: usize> SoftGpioBus<'a, N> {
    pub fn new(pins: [&'a mut dyn GpioPin; N]) -> Self {
        Self { pins }
    }
}

impl<const N: usize> Debug for SoftGpioBus<'_, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SoftGpioBus({:?})", self.pins)
    }
}

impl<const N: usize> GpioBus<N> for SoftGpioBus<'_, N> {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioBusInput<N> + '_>> {
        let inputs = self
            .pins
            .iter_mut()
            .map(|pin| pin.as_input())
            .collect::<GpioResult<Vec<_>>>()?;
        Ok(Box::new(SoftGpioBusInput::<N> { inputs }))
    }

    fn as_output(&mut self) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>> {
        let outputs = self
            .pins
            .iter_mut()
            .map(|pin| pin.as_output())
            .collect::<GpioResult<Vec<_>>>()?;
        Ok(Box::new(SoftGpioBusOutput::<N> { outputs }))
    }

    fn supports_bias(&self) -> bool {
        self.pins.iter().all(|pin| pin.supports_bias())
    }

    fn bias(&self) -> GpioBias {
        self.pins[0].bias()
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        if !self.supports_bias() {
            return Err(GpioError::NotSupported);
        }

        for pin in self.pins.iter_mut() {
            pin.set_bias(bias)?;
        }
        Ok(())
    }
}

struct SoftGpioBusInput<'a, const N: usize> {
    inputs: Vec<Box<dyn GpioInput + 'a>>,
}

impl<const N: usize> Debug for SoftGpioBusInput<'_, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SoftGpioBusInput({:?})", self.inputs)
    }
}

impl<const N: usize> GpioBusInput<N> for SoftGpioBusInput<'_, N> {
    fn read(&self) -> GpioResult<[bool; N]> {
        let mut values = [false; N];
        for (value, input) in values.iter_mut().zip(&self.inputs) {
            *value = input.read()?;
        }
        Ok(values)
    }
}

struct SoftGpioBusOutput<'a, const N: usize> {
    outputs: Vec<Box<dyn GpioOutput + 'a>>,
}

impl<const N: usize> Debug for SoftGpioBusOutput<'_, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SoftGpioBusOutput({:?})", self.outputs)
    }
}

impl<const N: usize> GpioBusOutput<N> for SoftGpioBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        for (output, &value) in self.outputs.iter().zip(values) {
            output.write(value)?;
        }
        Ok(())
    }
}
