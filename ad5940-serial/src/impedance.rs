//! Impedance measurement on a three-electrode cell.
//!
//! [`ImpedanceApp`] owns the measurement settings ([`AppConfig`]) and the
//! Rtia calibration value, and drives an [`Ad5940`] through configuration,
//! calibration, and measurement. Nothing here is shared: each call borrows
//! both the app and the driver mutably for its whole duration.

use embedded_hal::delay::DelayNs;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::afe::{
    AdcBaseConfig, AdcFilterConfig, AdcMuxN, AdcMuxP, AdcPga, AdcRate, AfeBlocks, DftConfig,
    DftLength, DftSource, DspConfig, Excitation, HsDacConfig, HsLoopConfig, HsTiaConfig,
    ReferenceConfig, RtiaSelection, SineWave, Sinc2Osr, Sinc3Osr, SwitchMatrix, WaveformConfig,
    waveform_frequency_word,
};
use crate::dft::{AcquisitionMode, CancelToken, ComplexSample, DEFAULT_POLL_INTERVAL_US, StdDelay};
use crate::driver::{Ad5940, RtiaCalConfig, RtiaCalibration};
use crate::error::FirstFailure;
use crate::transport::Transport;
use crate::Error;

/// Peak-to-peak ceiling, in mV, over which excitation gain bands are chosen.
pub const ADC_PP_MAX_MV: f64 = 809.0;

/// Settings for impedance measurement.
///
/// Missing fields take their default when deserialised, so a configuration
/// file only needs to name what it changes:
///
/// ```
/// use ad5940_serial::AppConfig;
///
/// let config: AppConfig = serde_json::from_str(r#"{"sin_freq_hz": 5000.0}"#)?;
/// assert_eq!(config.sin_freq_hz, 5000.0);
/// assert_eq!(config.vout_pp_mv, 600.0);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// System clock in Hz.
    pub sys_clock_hz: f64,
    /// ADC clock in Hz.
    pub adc_clock_hz: f64,
    /// Calibration resistor in ohms.
    pub rcal_ohms: f64,
    /// High-speed TIA gain resistor.
    pub rtia: RtiaSelection,
    /// High-speed TIA feedback capacitor in pF.
    pub ctia_pf: u8,
    /// Excitation amplitude in mV peak-to-peak.
    ///
    /// Clamped to [`Excitation::SUPPLY_LIMIT_MV`] by
    /// [`ImpedanceApp::configure`].
    pub vout_pp_mv: f64,
    /// Excitation frequency in Hz.
    pub sin_freq_hz: f64,
    /// Sinc3 oversampling.
    pub sinc3_osr: Sinc3Osr,
    /// Sinc2 oversampling.
    pub sinc2_osr: Sinc2Osr,
    /// DFT length.
    pub dft_length: DftLength,
    /// DFT input.
    pub dft_source: DftSource,
    /// How measurement DFTs detect completion.
    pub acquisition: AcquisitionMode,
    /// Pause between DFT-ready flag reads during calibration, in
    /// microseconds.
    pub calibration_poll_interval_us: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sys_clock_hz: 16e6,
            adc_clock_hz: 16e6,
            rcal_ohms: 10_000.0,
            rtia: RtiaSelection::R5k,
            ctia_pf: 16,
            vout_pp_mv: 600.0,
            sin_freq_hz: 1000.0,
            sinc3_osr: Sinc3Osr::X2,
            sinc2_osr: Sinc2Osr::X22,
            dft_length: DftLength::N8192,
            dft_source: DftSource::Sinc3,
            acquisition: AcquisitionMode::default(),
            calibration_poll_interval_us: DEFAULT_POLL_INTERVAL_US,
        }
    }
}

impl AppConfig {
    fn tia(&self) -> HsTiaConfig {
        HsTiaConfig::new(self.rtia, self.ctia_pf)
    }

    fn dft(&self) -> DftConfig {
        DftConfig {
            length: self.dft_length,
            source: self.dft_source,
            hanning: true,
        }
    }

    fn filter(&self) -> AdcFilterConfig {
        AdcFilterConfig::impedance(
            self.sinc3_osr,
            self.sinc2_osr,
            AdcRate::for_clock(self.adc_clock_hz),
        )
    }
}

/// Impedance measurement context.
///
/// Holds the [`AppConfig`] and the Rtia calibration value that every
/// measurement divides by. `D` paces interrupt-flag polling and defaults to
/// sleeping the current thread.
#[derive(Debug)]
pub struct ImpedanceApp<D = StdDelay> {
    config: AppConfig,
    calibration: Option<Complex32>,
    delay: D,
    cancel: CancelToken,
}

impl Default for ImpedanceApp<StdDelay> {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl ImpedanceApp<StdDelay> {
    /// A context with the given settings and no calibration.
    pub fn new(config: AppConfig) -> Self {
        Self::with_delay(config, StdDelay)
    }
}

impl<D: DelayNs> ImpedanceApp<D> {
    /// A context that paces flag polling with `delay`.
    pub fn with_delay(config: AppConfig, delay: D) -> Self {
        Self {
            config,
            calibration: None,
            delay,
            cancel: CancelToken::new(),
        }
    }

    /// Current settings.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Mutable access to the settings. Changes take effect at the next
    /// [`ImpedanceApp::configure`].
    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Calibration value used by [`ImpedanceApp::measure`], if any.
    pub fn calibration(&self) -> Option<Complex32> {
        self.calibration
    }

    /// Use a known Rtia value instead of running [`ImpedanceApp::calibrate`].
    pub fn set_calibration(&mut self, rtia: Complex32) {
        self.calibration = Some(rtia);
    }

    /// Token that cancels interrupt-mode waits started by this context.
    ///
    /// A cancellation ends the operation that observes it with
    /// [`Error::Cancelled`] and is then withdrawn, so the context and its
    /// calibration stay usable.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn settle<R>(&self, result: Result<R, Error>) -> Result<R, Error> {
        if matches!(result, Err(Error::Cancelled)) {
            log::debug!("cancellation observed, token reset");
            self.cancel.reset();
        }
        result
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Calibration
    ////////////////////////////////////////////////////////////////////////////////

    /// Calibrate Rtia at the configured frequency and keep the result for
    /// later measurements.
    ///
    /// A failed calibration leaves any previous calibration value in place.
    pub fn calibrate<T: Transport>(
        &mut self,
        afe: &mut Ad5940<T>,
    ) -> Result<RtiaCalibration, Error> {
        let config = RtiaCalConfig {
            sys_clock_hz: self.config.sys_clock_hz,
            adc_clock_hz: self.config.adc_clock_hz,
            frequency_hz: self.config.sin_freq_hz,
            rcal_ohms: self.config.rcal_ohms,
            tia: self.config.tia(),
            sinc3_osr: self.config.sinc3_osr,
            sinc2_osr: self.config.sinc2_osr,
            dft: self.config.dft(),
            poll_interval_us: self.config.calibration_poll_interval_us,
        };
        let result = afe.hs_rtia_cal(&config, &mut self.delay, &self.cancel);
        let calibration = self.settle(result)?;
        self.calibration = Some(calibration.value);
        Ok(calibration)
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Measurement
    ////////////////////////////////////////////////////////////////////////////////

    /// Configure references, the high-speed loop, and the signal path for
    /// measurement at the configured frequency and amplitude.
    ///
    /// The excitation amplitude is first clamped to
    /// [`Excitation::SUPPLY_LIMIT_MV`] (the clamped value is kept in the
    /// settings). The gain band and amplitude word are then chosen against
    /// [`ADC_PP_MAX_MV`].
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] with the first failure, after every step was
    /// attempted.
    pub fn configure<T: Transport>(&mut self, afe: &mut Ad5940<T>) -> Result<(), Error> {
        if self.config.vout_pp_mv > Excitation::SUPPLY_LIMIT_MV {
            log::warn!(
                "excitation {} mV clamped to {} mV",
                self.config.vout_pp_mv,
                Excitation::SUPPLY_LIMIT_MV
            );
            self.config.vout_pp_mv = Excitation::SUPPLY_LIMIT_MV;
        }
        let excitation = Excitation::truncated(self.config.vout_pp_mv, ADC_PP_MAX_MV);
        log::debug!(
            "configuring {} Hz, {} mV: {excitation:?}",
            self.config.sin_freq_hz,
            self.config.vout_pp_mv
        );

        let hs_loop = HsLoopConfig {
            dac: HsDacConfig {
                buffer_gain: excitation.buffer_gain,
                dac_gain: excitation.dac_gain,
                update_rate: 7,
            },
            tia: self.config.tia(),
            switches: SwitchMatrix::IDLE,
            waveform: WaveformConfig {
                sine: SineWave {
                    frequency_word: waveform_frequency_word(
                        self.config.sin_freq_hz,
                        self.config.sys_clock_hz,
                    ),
                    amplitude_word: excitation.amplitude_word,
                    offset_word: 0,
                    phase_word: 0,
                },
                ..WaveformConfig::default()
            },
        };
        let dsp = DspConfig {
            adc: AdcBaseConfig {
                mux_p: AdcMuxP::HstiaP,
                mux_n: AdcMuxN::HstiaN,
                pga: AdcPga::X1,
            },
            filter: self.config.filter(),
            dft: self.config.dft(),
        };

        let mut batch = FirstFailure::new();
        batch.record(afe.afe_reference(&ReferenceConfig::measurement()));
        batch.record(afe.afe_hs_loop(&hs_loop));
        batch.record(afe.afe_dsp(&dsp));
        batch.record(afe.afe_ctrl(AfeBlocks::HS_LOOP, true));
        batch.finish("configure")
    }

    /// Measure the impedance of the cell between CE0/RE0 and SE0.
    ///
    /// One DFT is taken of the TIA output (current) and one of the CE0
    /// voltage. The switch matrix is returned to its idle state afterwards,
    /// whether or not the measurement succeeded. The impedance is
    /// `V / (-I / Rtia)`, where the current sample is negated because the
    /// TIA inverts.
    ///
    /// # Errors
    ///
    /// - [`Error::NotCalibrated`] if there is no Rtia value yet.
    /// - [`Error::Cancelled`] if an interrupt-mode wait was cancelled.
    /// - The first failed step of the sequence. If restoring the switch
    ///   matrix also fails, that failure is only logged.
    pub fn measure<T: Transport>(&mut self, afe: &mut Ad5940<T>) -> Result<Complex32, Error> {
        let rtia = self.calibration.ok_or(Error::NotCalibrated)?;

        let samples = self.acquire_current_and_voltage(afe);
        let samples = self.settle(samples);
        let restored = afe.afe_switch_matrix(&SwitchMatrix::IDLE);
        let (current, voltage) = match (samples, restored) {
            (Ok(samples), Ok(())) => samples,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), restored) => {
                if let Err(restore_error) = restored {
                    log::warn!("switch matrix not restored after failed measurement: {restore_error}");
                }
                return Err(e);
            }
        };

        let current = -current.to_complex();
        let impedance = voltage.to_complex() / (current / rtia);
        log::info!(
            "impedance magnitude={:.2} phase={:.2}",
            impedance.norm(),
            impedance.arg()
        );
        Ok(impedance)
    }

    fn acquire_current_and_voltage<T: Transport>(
        &mut self,
        afe: &mut Ad5940<T>,
    ) -> Result<(ComplexSample, ComplexSample), Error> {
        let mode = self.config.acquisition;
        afe.afe_switch_matrix(&SwitchMatrix::CELL)?;
        afe.afe_adc_mux(AdcMuxP::HstiaP, AdcMuxN::HstiaN)?;
        let current = afe.acquire_dft(mode, &mut self.delay, &self.cancel)?;
        afe.afe_adc_mux(AdcMuxP::Vce0, AdcMuxN::NNode)?;
        let voltage = afe.acquire_dft(mode, &mut self.delay, &self.cancel)?;
        log::debug!("current {current:?}, voltage {voltage:?}");
        Ok((current, voltage))
    }
}
