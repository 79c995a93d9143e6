use embedded_hal::delay::DelayNs;
use num_complex::Complex32;

use super::Ad5940;
use crate::afe::{
    AdcBaseConfig, AdcFilterConfig, AdcMuxN, AdcMuxP, AdcPga, AdcRate, AfeBlocks, DftConfig,
    DspConfig, Excitation, HsDacConfig, HsLoopConfig, HsTiaConfig, ReferenceConfig, SineWave, Sinc2Osr,
    Sinc3Osr, SwitchMatrix, WaveformConfig, waveform_frequency_word,
};
use crate::dft::{AcquisitionMode, CancelToken};
use crate::error::FirstFailure;
use crate::transport::Transport;
use crate::Error;

/// Peak-to-peak ceiling, in mV, used to choose the calibration excitation band.
const CALIBRATION_PP_CEILING_MV: f64 = 800.0;

/// Settings for calibrating the high-speed TIA gain resistor against the
/// on-board calibration resistor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtiaCalConfig {
    /// System clock, used for the waveform frequency word.
    pub sys_clock_hz: f64,
    /// ADC clock, used to choose the ADC data rate.
    pub adc_clock_hz: f64,
    /// Excitation frequency.
    pub frequency_hz: f64,
    /// Value of the calibration resistor.
    pub rcal_ohms: f64,
    /// TIA settings to calibrate.
    pub tia: HsTiaConfig,
    /// Sinc3 oversampling.
    pub sinc3_osr: Sinc3Osr,
    /// Sinc2 oversampling.
    pub sinc2_osr: Sinc2Osr,
    /// DFT settings.
    pub dft: DftConfig,
    /// Pause between DFT-ready flag reads, in microseconds.
    pub poll_interval_us: u32,
}

/// Calibrated complex value of the TIA gain resistor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtiaCalibration {
    /// Rtia as a complex impedance in ohms.
    pub value: Complex32,
}

impl RtiaCalibration {
    /// Magnitude in ohms.
    pub fn magnitude(&self) -> f32 {
        self.value.norm()
    }

    /// Phase in radians.
    pub fn phase(&self) -> f32 {
        self.value.arg()
    }
}

impl<T: Transport> Ad5940<T> {
    /// Measure the high-speed TIA gain resistor as a complex impedance.
    ///
    /// A sine wave is driven through the calibration resistor and into the
    /// TIA. One DFT measures the voltage across the calibration resistor, a
    /// second measures the TIA output. With both conjugated and the TIA
    /// output negated, their ratio scaled by the calibration resistor's value
    /// is the TIA gain resistor.
    ///
    /// The excitation amplitude is `1800 mV * 0.8 * Rcal / Rtia`, so that the
    /// TIA output stays in range.
    ///
    /// Both DFTs wait for the DFT-ready interrupt flag; `delay` paces the
    /// flag reads and `cancel` can abandon them. The switch matrix is
    /// returned to its idle state afterwards, whether or not setup and the
    /// DFTs succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if the TIA gain resistor is open.
    /// - [`Error::Configuration`] if any configuration step fails. All of them
    ///   are attempted before the first failure is returned.
    /// - Any error from the two acquisitions. If restoring the switch matrix
    ///   also fails, that failure is only logged.
    pub fn hs_rtia_cal(
        &mut self,
        config: &RtiaCalConfig,
        delay: &mut impl DelayNs,
        cancel: &CancelToken,
    ) -> Result<RtiaCalibration, Error> {
        let Some(rtia_ohms) = config.tia.rtia.ohms() else {
            return Err(Error::InvalidConfiguration(
                "cannot calibrate an open TIA gain resistor",
            ));
        };
        let excitation_mv = Excitation::SUPPLY_LIMIT_MV * config.rcal_ohms / rtia_ohms;
        let excitation = Excitation::rounded(excitation_mv, CALIBRATION_PP_CEILING_MV);
        log::debug!("Rtia calibration excitation {excitation_mv:.1} mV: {excitation:?}");

        let hs_loop = HsLoopConfig {
            dac: HsDacConfig {
                buffer_gain: excitation.buffer_gain,
                dac_gain: excitation.dac_gain,
                update_rate: 7,
            },
            tia: config.tia,
            switches: SwitchMatrix::RCAL,
            waveform: WaveformConfig {
                sine: SineWave {
                    frequency_word: waveform_frequency_word(
                        config.frequency_hz,
                        config.sys_clock_hz,
                    ),
                    amplitude_word: excitation.amplitude_word,
                    ..SineWave::default()
                },
                ..WaveformConfig::default()
            },
        };
        let dsp = DspConfig {
            adc: AdcBaseConfig {
                mux_p: AdcMuxP::PNode,
                mux_n: AdcMuxN::NNode,
                pga: AdcPga::X1,
            },
            filter: AdcFilterConfig::impedance(
                config.sinc3_osr,
                config.sinc2_osr,
                AdcRate::for_clock(config.adc_clock_hz),
            ),
            dft: config.dft,
        };

        let mut batch = FirstFailure::new();
        batch.record(self.afe_ctrl(AfeBlocks::ALL, false));
        batch.record(self.afe_reference(&ReferenceConfig::high_power_only()));
        batch.record(self.afe_hs_loop(&hs_loop));
        batch.record(self.afe_dsp(&dsp));
        batch.record(self.afe_ctrl(AfeBlocks::HS_LOOP.without(AfeBlocks::HP_REFERENCE), true));

        let mode = AcquisitionMode::Interrupt {
            poll_interval_us: config.poll_interval_us,
        };
        let dfts = batch
            .finish("Rtia calibration setup")
            .and_then(|()| self.acquire_rcal_and_rtia(mode, delay, cancel));
        let restored = self.afe_switch_matrix(&SwitchMatrix::IDLE);
        let (rcal, rtia) = match (dfts, restored) {
            (Ok(dfts), Ok(())) => dfts,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), restored) => {
                if let Err(restore_error) = restored {
                    log::warn!("switch matrix not restored after failed calibration: {restore_error}");
                }
                return Err(e);
            }
        };
        log::debug!("Rtia calibration DFTs: Rcal {rcal}, Rtia {rtia}");

        let value = rtia_from_dft(rcal, rtia, config.rcal_ohms as f32);
        log::info!(
            "Rtia calibrated: {value} ({:.2} Ω, {:.4} rad)",
            value.norm(),
            value.arg()
        );
        Ok(RtiaCalibration { value })
    }

    fn acquire_rcal_and_rtia(
        &mut self,
        mode: AcquisitionMode,
        delay: &mut impl DelayNs,
        cancel: &CancelToken,
    ) -> Result<(Complex32, Complex32), Error> {
        let rcal = self.acquire_dft(mode, delay, cancel)?.to_complex();
        self.afe_adc_mux(AdcMuxP::HstiaP, AdcMuxN::HstiaN)?;
        let rtia = self.acquire_dft(mode, delay, cancel)?.to_complex();
        Ok((rcal, rtia))
    }
}

/// Combine the calibration resistor and TIA output DFTs into Rtia.
fn rtia_from_dft(rcal: Complex32, rtia: Complex32, rcal_ohms: f32) -> Complex32 {
    -rtia.conj() / rcal.conj() * rcal_ohms
}
