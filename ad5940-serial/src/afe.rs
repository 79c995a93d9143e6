//! Configuration records for the AFE blocks used in impedance measurement.
//!
//! Each record describes the desired state of one hardware block. The
//! records are applied by the batch configuration methods on
//! [`Ad5940`](crate::Ad5940), which translate them into register writes.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::registers::{WGFCW_ACCUMULATOR_BITS, WGFCW_MASK};

////////////////////////////////////////////////////////////////////////////////
// Block enables
////////////////////////////////////////////////////////////////////////////////

/// Set of AFE blocks that can be powered or enabled through AFECON.
///
/// Combine with `|`:
///
/// ```
/// use ad5940_serial::afe::AfeBlocks;
///
/// let blocks = AfeBlocks::WAVEFORM_GENERATOR | AfeBlocks::ADC_POWER;
/// assert!(blocks.contains(AfeBlocks::ADC_POWER));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AfeBlocks(u32);

impl AfeBlocks {
    /// High-power reference. Its AFECON bit is a disable bit.
    pub const HP_REFERENCE: Self = Self(1 << 5);
    /// High-speed DAC.
    pub const HS_DAC: Self = Self(1 << 6);
    /// ADC power.
    pub const ADC_POWER: Self = Self(1 << 7);
    /// ADC conversion.
    pub const ADC_CONVERSION: Self = Self(1 << 8);
    /// Excitation buffer.
    pub const EXCITATION_BUFFER: Self = Self(1 << 9);
    /// Excitation instrumentation amplifier.
    pub const INAMP: Self = Self(1 << 10);
    /// High-speed TIA.
    pub const HS_TIA: Self = Self(1 << 11);
    /// Waveform generator.
    pub const WAVEFORM_GENERATOR: Self = Self(1 << 14);
    /// DFT engine.
    pub const DFT: Self = Self(1 << 15);
    /// Sinc2 and notch filter.
    pub const SINC2_NOTCH: Self = Self(1 << 16);
    /// Analog LDO current limit. Its AFECON bit is a disable bit.
    pub const ALDO_LIMIT: Self = Self(1 << 19);
    /// DAC reference buffer.
    pub const DAC_REFERENCE: Self = Self(1 << 20);
    /// Every controllable block.
    pub const ALL: Self = Self(0x0039_FFE0);

    /// Blocks powered for the high-speed measurement loop.
    pub const HS_LOOP: Self = Self(
        Self::HP_REFERENCE.0
            | Self::HS_TIA.0
            | Self::INAMP.0
            | Self::EXCITATION_BUFFER.0
            | Self::DAC_REFERENCE.0
            | Self::HS_DAC.0
            | Self::SINC2_NOTCH.0,
    );

    /// Raw AFECON mask.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every block in `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self` without the blocks in `other`.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for AfeBlocks {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AfeBlocks {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Reference buffers
////////////////////////////////////////////////////////////////////////////////

/// State of the high-power and low-power voltage references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceConfig {
    /// High-power bandgap.
    pub hp_bandgap: bool,
    /// High-power 1.1 V buffer.
    pub hp_1v1_buffer: bool,
    /// High-power 1.8 V buffer.
    pub hp_1v8_buffer: bool,
    /// Disconnect the 1.1 V decoupling capacitor.
    pub disconnect_1v1_cap: bool,
    /// Disconnect the 1.8 V decoupling capacitor.
    pub disconnect_1v8_cap: bool,
    /// 1.8 V thermistor buffer.
    pub hp_1v8_thermistor_buffer: bool,
    /// Current limit on the high-power 1.8 V buffer.
    pub hp_1v8_current_limit: bool,
    /// Low-power 1.1 V buffer.
    pub lp_1v1_buffer: bool,
    /// Low-power 1.8 V buffer.
    pub lp_1v8_buffer: bool,
    /// Low-power bandgap.
    pub lp_bandgap: bool,
    /// Low-power 2.5 V reference buffer.
    pub lp_reference_buffer: bool,
    /// Boost the low-power reference buffer current.
    pub lp_reference_boost: bool,
}

impl ReferenceConfig {
    /// High-power references on, plus the low-power bandgap and buffer.
    pub fn measurement() -> Self {
        Self {
            hp_bandgap: true,
            hp_1v1_buffer: true,
            hp_1v8_buffer: true,
            lp_bandgap: true,
            lp_reference_buffer: true,
            ..Self::default()
        }
    }

    /// High-power references only.
    pub fn high_power_only() -> Self {
        Self {
            lp_bandgap: false,
            lp_reference_buffer: false,
            ..Self::measurement()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// High-speed loop
////////////////////////////////////////////////////////////////////////////////

/// Gain of the excitation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcitationBufferGain {
    /// Gain of 2.
    X2,
    /// Gain of 0.25.
    X0_25,
}

/// Gain of the high-speed DAC output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsDacGain {
    /// Gain of 1.
    X1,
    /// Gain of 0.2.
    X0_2,
}

/// High-speed DAC settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsDacConfig {
    /// Excitation buffer gain.
    pub buffer_gain: ExcitationBufferGain,
    /// DAC gain.
    pub dac_gain: HsDacGain,
    /// DAC update rate divider (8 bits).
    pub update_rate: u8,
}

/// Bias voltage of the high-speed TIA positive input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiaBias {
    /// 1.1 V internal reference.
    #[default]
    V1_1,
    /// Low-power VZERO0.
    Vzero0,
}

impl From<TiaBias> for u32 {
    fn from(value: TiaBias) -> Self {
        match value {
            TiaBias::V1_1 => 0,
            TiaBias::Vzero0 => 1,
        }
    }
}

/// Gain resistor of the high-speed TIA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtiaSelection {
    /// 200 Ω.
    R200,
    /// 1 kΩ.
    R1k,
    /// 5 kΩ.
    R5k,
    /// 10 kΩ.
    R10k,
    /// 20 kΩ.
    R20k,
    /// 40 kΩ.
    R40k,
    /// 80 kΩ.
    R80k,
    /// 160 kΩ.
    R160k,
    /// No resistor.
    Open,
}

impl RtiaSelection {
    /// Nominal resistance in ohms, or `None` for [`RtiaSelection::Open`].
    pub fn ohms(self) -> Option<f64> {
        match self {
            RtiaSelection::R200 => Some(200.0),
            RtiaSelection::R1k => Some(1_000.0),
            RtiaSelection::R5k => Some(5_000.0),
            RtiaSelection::R10k => Some(10_000.0),
            RtiaSelection::R20k => Some(20_000.0),
            RtiaSelection::R40k => Some(40_000.0),
            RtiaSelection::R80k => Some(80_000.0),
            RtiaSelection::R160k => Some(160_000.0),
            RtiaSelection::Open => None,
        }
    }
}

impl From<RtiaSelection> for u32 {
    fn from(value: RtiaSelection) -> Self {
        match value {
            RtiaSelection::R200 => 0,
            RtiaSelection::R1k => 1,
            RtiaSelection::R5k => 2,
            RtiaSelection::R10k => 3,
            RtiaSelection::R20k => 4,
            RtiaSelection::R40k => 5,
            RtiaSelection::R80k => 6,
            RtiaSelection::R160k => 7,
            RtiaSelection::Open => 8,
        }
    }
}

/// High-speed TIA settings.
///
/// The DE0 load and DE0 Rtia resistors are always left open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsTiaConfig {
    /// Positive input bias.
    pub bias: TiaBias,
    /// Feedback capacitor in pF (0 to 255).
    pub ctia_pf: u8,
    /// Gain resistor.
    pub rtia: RtiaSelection,
    /// Close the protection diode switch.
    pub diode_close: bool,
}

impl HsTiaConfig {
    /// TIA biased at 1.1 V with the given feedback network.
    pub fn new(rtia: RtiaSelection, ctia_pf: u8) -> Self {
        Self {
            bias: TiaBias::V1_1,
            ctia_pf,
            rtia,
            diode_close: false,
        }
    }
}

/// Switch bit masks for the four switch groups.
pub mod switch {
    /// D switch: all open.
    pub const D_OPEN: u32 = 0;
    /// D switch: RCAL0.
    pub const D_RCAL0: u32 = 1 << 0;
    /// D switch: CE0.
    pub const D_CE0: u32 = 1 << 4;

    /// P switch: RCAL0.
    pub const P_RCAL0: u32 = 1 << 0;
    /// P switch: RE0.
    pub const P_RE0: u32 = 1 << 4;
    /// P switch: PL.
    pub const P_PL: u32 = 1 << 13;
    /// P switch: PL2.
    pub const P_PL2: u32 = 1 << 14;

    /// N switch: SE0.
    pub const N_SE0: u32 = 1 << 8;
    /// N switch: RCAL1.
    pub const N_RCAL1: u32 = 1 << 9;
    /// N switch: NL.
    pub const N_NL: u32 = 1 << 10;
    /// N switch: NL2.
    pub const N_NL2: u32 = 1 << 11;

    /// T switch: SE0 load.
    pub const T_SE0LOAD: u32 = 1 << 4;
    /// T switch: Rtia.
    pub const T_TRTIA: u32 = 1 << 8;
    /// T switch: RCAL1.
    pub const T_RCAL1: u32 = 1 << 11;
}

/// Full state of the D, P, N, and T switch groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchMatrix {
    /// D switches (excitation amplifier output).
    pub d: u32,
    /// P switches (excitation amplifier positive input).
    pub p: u32,
    /// N switches (excitation amplifier negative input).
    pub n: u32,
    /// T switches (TIA input).
    pub t: u32,
}

impl SwitchMatrix {
    /// Excitation disconnected, TIA fed back through Rtia.
    pub const IDLE: Self = Self {
        d: switch::D_OPEN,
        p: switch::P_PL | switch::P_PL2,
        n: switch::N_NL | switch::N_NL2,
        t: switch::T_TRTIA,
    };

    /// Three-electrode cell: excite CE0, sense RE0, current from SE0.
    pub const CELL: Self = Self {
        d: switch::D_CE0,
        p: switch::P_RE0,
        n: switch::N_SE0,
        t: switch::T_SE0LOAD | switch::T_TRTIA,
    };

    /// Excitation through the calibration resistor into the TIA.
    pub const RCAL: Self = Self {
        d: switch::D_RCAL0,
        p: switch::P_RCAL0,
        n: switch::N_RCAL1,
        t: switch::T_RCAL1 | switch::T_TRTIA,
    };
}

/// Sine wave generator words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SineWave {
    /// Frequency control word (24 bits), see [`waveform_frequency_word`].
    pub frequency_word: u32,
    /// Amplitude word (11 bits).
    pub amplitude_word: u32,
    /// Offset word.
    pub offset_word: u32,
    /// Phase word.
    pub phase_word: u32,
}

/// Waveform generator settings. Only sine output is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaveformConfig {
    /// Sine wave parameters.
    pub sine: SineWave,
    /// Enable DAC gain calibration.
    pub gain_calibration: bool,
    /// Enable DAC offset calibration.
    pub offset_calibration: bool,
}

/// Complete high-speed loop: DAC, TIA, switches, and waveform generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsLoopConfig {
    /// DAC settings.
    pub dac: HsDacConfig,
    /// TIA settings.
    pub tia: HsTiaConfig,
    /// Switch matrix.
    pub switches: SwitchMatrix,
    /// Waveform generator.
    pub waveform: WaveformConfig,
}

/// Compute the sine frequency control word for `frequency_hz` given the
/// waveform generator clock.
///
/// The word is `round(f * 2^30 / clock)`, saturated to 24 bits. A zero clock
/// yields zero.
pub fn waveform_frequency_word(frequency_hz: f64, clock_hz: f64) -> u32 {
    if clock_hz <= 0.0 || frequency_hz <= 0.0 {
        return 0;
    }
    let word = (frequency_hz * 2f64.powi(WGFCW_ACCUMULATOR_BITS) / clock_hz).round();
    if word >= f64::from(WGFCW_MASK) {
        WGFCW_MASK
    } else {
        word as u32
    }
}

/// Excitation gain band and amplitude word for a requested peak-to-peak
/// voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Excitation {
    /// Excitation buffer gain.
    pub buffer_gain: ExcitationBufferGain,
    /// DAC gain.
    pub dac_gain: HsDacGain,
    /// Amplitude word, at most [`Excitation::MAX_AMPLITUDE_WORD`].
    pub amplitude_word: u32,
}

impl Excitation {
    /// Largest amplitude word accepted by the waveform generator.
    pub const MAX_AMPLITUDE_WORD: u32 = 0x7FF;

    /// Largest excitation the 1.8 V analog supply allows, in mV
    /// peak-to-peak.
    pub const SUPPLY_LIMIT_MV: f64 = 1800.0 * 0.8;

    /// Pick the gain band for `vout_pp_mv` against a peak-to-peak ceiling, and
    /// truncate the amplitude word.
    ///
    /// The bands split at 5 %, 25 %, and 40 % of `ceiling_mv`:
    ///
    /// | amplitude         | buffer | DAC | full scale       |
    /// |-------------------|--------|-----|------------------|
    /// | ≤ 5 %             | 0.25   | 0.2 | 5 % of ceiling   |
    /// | ≤ 25 %            | 0.25   | 1   | 25 % of ceiling  |
    /// | ≤ 40 %            | 2      | 0.2 | 40 % of ceiling  |
    /// | above             | 2      | 1   | 2 × ceiling      |
    pub fn truncated(vout_pp_mv: f64, ceiling_mv: f64) -> Self {
        Self::select(vout_pp_mv, ceiling_mv, f64::trunc)
    }

    /// As [`Excitation::truncated`], but rounding the amplitude word to the
    /// nearest integer.
    pub fn rounded(vout_pp_mv: f64, ceiling_mv: f64) -> Self {
        Self::select(vout_pp_mv, ceiling_mv, f64::round)
    }

    fn select(vout_pp_mv: f64, ceiling_mv: f64, to_integer: fn(f64) -> f64) -> Self {
        let (buffer_gain, dac_gain, full_scale) = if vout_pp_mv <= ceiling_mv * 0.05 {
            (ExcitationBufferGain::X0_25, HsDacGain::X0_2, ceiling_mv * 0.05)
        } else if vout_pp_mv <= ceiling_mv * 0.25 {
            (ExcitationBufferGain::X0_25, HsDacGain::X1, ceiling_mv * 0.25)
        } else if vout_pp_mv <= ceiling_mv * 0.4 {
            (ExcitationBufferGain::X2, HsDacGain::X0_2, ceiling_mv * 0.4)
        } else {
            (ExcitationBufferGain::X2, HsDacGain::X1, ceiling_mv * 2.0)
        };
        let word = to_integer(vout_pp_mv * 2047.0 / full_scale).max(0.0);
        let amplitude_word = if word >= f64::from(Self::MAX_AMPLITUDE_WORD) {
            Self::MAX_AMPLITUDE_WORD
        } else {
            word as u32
        };
        Self {
            buffer_gain,
            dac_gain,
            amplitude_word,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ADC and digital signal path
////////////////////////////////////////////////////////////////////////////////

/// ADC positive input selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcMuxP {
    /// High-speed TIA positive output.
    HstiaP,
    /// CE0 voltage.
    Vce0,
    /// Excitation amplifier P node.
    PNode,
}

impl From<AdcMuxP> for u32 {
    fn from(value: AdcMuxP) -> Self {
        match value {
            AdcMuxP::HstiaP => 0x01,
            AdcMuxP::Vce0 => 0x1A,
            AdcMuxP::PNode => 0x23,
        }
    }
}

/// ADC negative input selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcMuxN {
    /// High-speed TIA negative output.
    HstiaN,
    /// Excitation amplifier N node.
    NNode,
}

impl From<AdcMuxN> for u32 {
    fn from(value: AdcMuxN) -> Self {
        match value {
            AdcMuxN::HstiaN => 0x01,
            AdcMuxN::NNode => 0x14,
        }
    }
}

/// ADC programmable gain amplifier setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdcPga {
    /// Gain of 1.
    #[default]
    X1,
    /// Gain of 1.5.
    X1_5,
    /// Gain of 2.
    X2,
    /// Gain of 4.
    X4,
    /// Gain of 9.
    X9,
}

impl From<AdcPga> for u32 {
    fn from(value: AdcPga) -> Self {
        match value {
            AdcPga::X1 => 0,
            AdcPga::X1_5 => 1,
            AdcPga::X2 => 2,
            AdcPga::X4 => 3,
            AdcPga::X9 => 4,
        }
    }
}

/// ADC input mux and gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcBaseConfig {
    /// Positive input.
    pub mux_p: AdcMuxP,
    /// Negative input.
    pub mux_n: AdcMuxN,
    /// PGA gain.
    pub pga: AdcPga,
}

/// ADC output data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcRate {
    /// 800 kHz, for a 16 MHz ADC clock.
    Khz800,
    /// 1.6 MHz, for a 32 MHz ADC clock.
    Mhz1_6,
}

impl AdcRate {
    /// ADC clocks above this are treated as the 32 MHz clock mode.
    pub const FAST_CLOCK_THRESHOLD_HZ: f64 = 32e6 * 0.8;

    /// Data rate matching an ADC clock frequency.
    pub fn for_clock(adc_clock_hz: f64) -> Self {
        if adc_clock_hz > Self::FAST_CLOCK_THRESHOLD_HZ {
            AdcRate::Mhz1_6
        } else {
            AdcRate::Khz800
        }
    }
}

/// Sinc3 filter oversampling ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sinc3Osr {
    /// Divide by 5.
    X5,
    /// Divide by 4.
    X4,
    /// Divide by 2.
    X2,
}

impl From<Sinc3Osr> for u32 {
    fn from(value: Sinc3Osr) -> Self {
        match value {
            Sinc3Osr::X5 => 0,
            Sinc3Osr::X4 => 1,
            Sinc3Osr::X2 => 2,
        }
    }
}

/// Sinc2 filter oversampling ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Sinc2Osr {
    X22,
    X44,
    X89,
    X178,
    X267,
    X533,
    X640,
    X667,
    X800,
    X889,
    X1067,
    X1333,
}

impl From<Sinc2Osr> for u32 {
    fn from(value: Sinc2Osr) -> Self {
        value as u32
    }
}

/// Number of samples averaged before the DFT when the average block is the
/// DFT source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AverageCount {
    X2,
    X4,
    X8,
    X16,
}

impl From<AverageCount> for u32 {
    fn from(value: AverageCount) -> Self {
        value as u32
    }
}

/// ADC digital filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcFilterConfig {
    /// Sinc3 oversampling.
    pub sinc3_osr: Sinc3Osr,
    /// Sinc2 oversampling.
    pub sinc2_osr: Sinc2Osr,
    /// Averaging.
    pub average: AverageCount,
    /// Output data rate.
    pub rate: AdcRate,
    /// Bypass the 50/60 Hz notch filter.
    pub bypass_notch: bool,
    /// Bypass the Sinc3 filter.
    pub bypass_sinc3: bool,
    /// Power up the Sinc2 and notch filter block.
    pub sinc2_notch: bool,
    /// Clock the Sinc2 and notch filter block.
    pub sinc2_notch_clock: bool,
    /// Clock the DFT engine.
    pub dft_clock: bool,
    /// Clock the waveform generator.
    pub waveform_clock: bool,
}

impl AdcFilterConfig {
    /// Filter chain used for impedance measurement: notch bypassed, Sinc3 and
    /// Sinc2 in use, averaging over 16 samples, every clock running.
    pub fn impedance(sinc3_osr: Sinc3Osr, sinc2_osr: Sinc2Osr, rate: AdcRate) -> Self {
        Self {
            sinc3_osr,
            sinc2_osr,
            average: AverageCount::X16,
            rate,
            bypass_notch: true,
            bypass_sinc3: false,
            sinc2_notch: true,
            sinc2_notch_clock: true,
            dft_clock: true,
            waveform_clock: true,
        }
    }
}

/// DFT length in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum DftLength {
    N4,
    N8,
    N16,
    N32,
    N64,
    N128,
    N256,
    N512,
    N1024,
    N2048,
    N4096,
    N8192,
    N16384,
}

impl From<DftLength> for u32 {
    fn from(value: DftLength) -> Self {
        value as u32
    }
}

/// Data fed into the DFT engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DftSource {
    /// Sinc2 and notch filter output.
    Sinc2Notch,
    /// Sinc3 filter output.
    Sinc3,
    /// Raw ADC data.
    AdcRaw,
    /// Averaging block output.
    Average,
}

/// DFT settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DftConfig {
    /// Number of samples.
    pub length: DftLength,
    /// Input source.
    pub source: DftSource,
    /// Apply a Hanning window.
    pub hanning: bool,
}

/// Complete digital signal path: ADC input, filters, and DFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DspConfig {
    /// ADC input and gain.
    pub adc: AdcBaseConfig,
    /// Digital filters.
    pub filter: AdcFilterConfig,
    /// DFT engine.
    pub dft: DftConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Interrupts
////////////////////////////////////////////////////////////////////////////////

/// One of the two AFE interrupt controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptController {
    /// Controller 0.
    Intc0,
    /// Controller 1.
    Intc1,
}

/// Interrupt source flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptSource(u32);

impl InterruptSource {
    /// DFT result ready.
    pub const DFT_READY: Self = Self(1 << 1);
    /// Every source.
    pub const ALL: Self = Self(u32::MAX);

    /// Raw flag mask.
    pub fn bits(self) -> u32 {
        self.0
    }
}
