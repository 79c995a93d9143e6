//! Single DFT acquisitions.
//!
//! An acquisition powers the waveform generator and ADC, starts conversion
//! with the DFT engine enabled, waits for the DFT result, switches those
//! blocks off again, and decodes the two result registers into a
//! [`ComplexSample`].
//!
//! Completion is detected in one of two ways, chosen by [`AcquisitionMode`]:
//!
//! - **Polling**: the result registers are zeroed before conversion starts,
//!   and then read until both are nonzero, at most `max_attempts` times. A
//!   result with a genuinely zero component cannot be told apart from one
//!   that is not ready, so such a measurement ends in
//!   [`Error::AcquisitionTimeout`].
//! - **Interrupt**: the DFT-ready flag is cleared before conversion starts and
//!   then polled on interrupt controller 1. There is no attempt limit; pass a
//!   [`CancelToken`] to abandon the wait from another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bit_field::BitField;
use embedded_hal::delay::DelayNs;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::afe::{AfeBlocks, InterruptController, InterruptSource};
use crate::driver::Ad5940;
use crate::error::FirstFailure;
use crate::registers::{DFT_RESULT_BITS, DFTIMAG, DFTREAL};
use crate::transport::Transport;
use crate::Error;

/// Default number of polls of the result registers in polling mode.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default pause between flag reads in interrupt mode.
pub const DEFAULT_POLL_INTERVAL_US: u32 = 1_000;

/// Sign-extend a 20-bit two's-complement DFT register value.
///
/// Bits above bit 19 are ignored.
///
/// ```
/// use ad5940_serial::dft::sign_extend;
///
/// assert_eq!(sign_extend(0x8_0000), -524_288);
/// assert_eq!(sign_extend(0x7_FFFF), 524_287);
/// assert_eq!(sign_extend(0), 0);
/// ```
pub fn sign_extend(raw: u32) -> i32 {
    let value = raw.get_bits(DFT_RESULT_BITS) as i32;
    if value >= 1 << 19 {
        value - (1 << 20)
    } else {
        value
    }
}

/// One DFT result: the signed real and imaginary parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComplexSample {
    /// Real part.
    pub real: i32,
    /// Imaginary part.
    pub imag: i32,
}

impl ComplexSample {
    /// Decode the raw contents of DFTREAL and DFTIMAG.
    pub fn from_raw(real: u32, imag: u32) -> Self {
        Self {
            real: sign_extend(real),
            imag: sign_extend(imag),
        }
    }

    /// The sample as a floating-point complex number.
    pub fn to_complex(self) -> Complex32 {
        Complex32::new(self.real as f32, self.imag as f32)
    }
}

/// How the end of a DFT computation is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Read the result registers until both are nonzero.
    Polling {
        /// Number of register pairs read before giving up.
        max_attempts: u32,
    },
    /// Wait for the DFT-ready interrupt flag.
    Interrupt {
        /// Pause between flag reads, in microseconds.
        poll_interval_us: u32,
    },
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        AcquisitionMode::Polling {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Shared flag that asks an interrupt-mode wait to give up.
///
/// Clones share the same flag. A request stays pending until an
/// interrupt-mode wait observes it; [`ImpedanceApp`](crate::ImpedanceApp)
/// then calls [`CancelToken::reset`] so the next operation starts afresh.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Withdraw a cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// [`DelayNs`] implementation that sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Blocks powered before conversion starts.
fn power_blocks() -> AfeBlocks {
    AfeBlocks::WAVEFORM_GENERATOR | AfeBlocks::ADC_POWER
}

/// Blocks that start conversion and the DFT.
fn conversion_blocks() -> AfeBlocks {
    AfeBlocks::ADC_CONVERSION | AfeBlocks::DFT
}

impl<T: Transport> Ad5940<T> {
    /// Run one DFT acquisition with the currently configured signal path.
    ///
    /// `delay` paces the flag reads in interrupt mode, and `cancel` may stop
    /// that wait. Neither is used in polling mode.
    ///
    /// The waveform generator, ADC, and DFT blocks are always switched off
    /// before returning, whether or not the acquisition succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::AcquisitionTimeout`] if polling ran out of attempts.
    /// - [`Error::Cancelled`] if the interrupt wait was cancelled.
    /// - The first register access failure otherwise.
    pub fn acquire_dft(
        &mut self,
        mode: AcquisitionMode,
        delay: &mut impl DelayNs,
        cancel: &CancelToken,
    ) -> Result<ComplexSample, Error> {
        match mode {
            AcquisitionMode::Polling { max_attempts } => self.acquire_dft_polling(max_attempts),
            AcquisitionMode::Interrupt { poll_interval_us } => {
                self.acquire_dft_interrupt(poll_interval_us, delay, cancel)
            }
        }
    }

    fn acquire_dft_polling(&mut self, max_attempts: u32) -> Result<ComplexSample, Error> {
        let mut batch = FirstFailure::new();
        batch.record(self.afe_ctrl(power_blocks(), true));
        batch.record(self.write_register(DFTREAL, 0));
        batch.record(self.write_register(DFTIMAG, 0));
        batch.record(self.afe_ctrl(conversion_blocks(), true));

        let mut ready = None;
        let mut attempts = 0;
        if !batch.has_failed() {
            while attempts < max_attempts {
                attempts += 1;
                let Some(real) = batch.record(self.read_register(DFTREAL)) else {
                    break;
                };
                let Some(imag) = batch.record(self.read_register(DFTIMAG)) else {
                    break;
                };
                if real != 0 && imag != 0 {
                    ready = Some((real, imag));
                    break;
                }
            }
        }

        batch.record(self.afe_ctrl(power_blocks() | conversion_blocks(), false));
        batch.into_result()?;

        match ready {
            Some((real, imag)) => {
                let sample = ComplexSample::from_raw(real, imag);
                log::debug!("DFT ready after {attempts} polls: {sample:?}");
                Ok(sample)
            }
            None => {
                log::warn!("DFT result not ready after {attempts} polls");
                Err(Error::AcquisitionTimeout { attempts })
            }
        }
    }

    fn acquire_dft_interrupt(
        &mut self,
        poll_interval_us: u32,
        delay: &mut impl DelayNs,
        cancel: &CancelToken,
    ) -> Result<ComplexSample, Error> {
        let mut batch = FirstFailure::new();
        batch.record(self.afe_ctrl(power_blocks(), true));
        batch.record(self.afe_interrupt_clear(InterruptSource::DFT_READY));
        batch.record(self.afe_ctrl(conversion_blocks(), true));

        let mut flag_reads = 0u32;
        if !batch.has_failed() {
            loop {
                if cancel.is_cancelled() {
                    batch.record::<()>(Err(Error::Cancelled));
                    break;
                }
                flag_reads += 1;
                match batch.record(
                    self.afe_interrupt_flag(InterruptController::Intc1, InterruptSource::DFT_READY),
                ) {
                    Some(true) => break,
                    Some(false) => delay.delay_us(poll_interval_us),
                    None => break,
                }
            }
        }

        batch.record(self.afe_ctrl(power_blocks() | conversion_blocks(), false));
        batch.into_result()?;

        let real = self.read_register(DFTREAL)?;
        let imag = self.read_register(DFTIMAG)?;
        let sample = ComplexSample::from_raw(real, imag);
        log::debug!("DFT ready after {flag_reads} flag reads: {sample:?}");
        Ok(sample)
    }
}
