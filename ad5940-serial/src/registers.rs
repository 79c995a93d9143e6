//! AD5940 register addresses and the bit fields the driver touches.
//!
//! Only the subset of the register map needed for high-speed impedance
//! measurement is described here. Addresses are the 16-bit values sent in the
//! `address` parameter of a method call.
//!
//! Field positions are given as bit indices (`usize`) or bit ranges, for use
//! with [`bit_field::BitField`].

use std::ops::Range;

////////////////////////////////////////////////////////////////////////////////
// Identification and clocks
////////////////////////////////////////////////////////////////////////////////

/// Analog Devices identifier, reads as [`ADIID_VALUE`].
pub const ADIID: u16 = 0x0400;
/// Chip identifier: part id in the upper 12 bits, revision in the lower 4.
pub const CHIPID: u16 = 0x0404;
/// Clock gate control.
pub const CLKEN1: u16 = 0x0410;
/// Internal I2C interrupt configuration.
pub const EI2CON: u16 = 0x0A28;

/// Expected content of [`ADIID`].
pub const ADIID_VALUE: u32 = 0x4144;
/// Expected content of [`CHIPID`] with the revision nibble masked off.
pub const CHIPID_PART: u32 = 0x5500;
/// Mask selecting the part id in [`CHIPID`].
pub const CHIPID_PART_MASK: u32 = 0xFFF0;

////////////////////////////////////////////////////////////////////////////////
// AFE control and waveform generator
////////////////////////////////////////////////////////////////////////////////

/// AFE block enable register.
pub const AFECON: u16 = 0x2000;
/// Switch matrix source selection.
pub const SWCON: u16 = 0x200C;
/// High-speed DAC configuration.
pub const HSDACCON: u16 = 0x2010;
/// Waveform generator configuration.
pub const WGCON: u16 = 0x2014;
/// Sine frequency control word.
pub const WGFCW: u16 = 0x2030;
/// Sine phase offset.
pub const WGPHASE: u16 = 0x2034;
/// Sine offset.
pub const WGOFFSET: u16 = 0x2038;
/// Sine amplitude.
pub const WGAMPLITUDE: u16 = 0x203C;

/// Bits of [`AFECON`].
pub mod afecon {
    /// High-power reference disable (inverted sense).
    pub const HPREFDIS: usize = 5;
    /// Analog LDO current limit enable (inverted sense in the block mask).
    pub const ALDOILIMITEN: usize = 19;
}

/// Bits of [`SWCON`].
pub mod swcon {
    /// Take switch states from the full-control registers.
    pub const SWSOURCESEL: usize = 16;
}

/// Fields of [`HSDACCON`].
pub mod hsdaccon {
    use std::ops::Range;

    /// PGA attenuator enable (DAC gain 0.2).
    pub const ATTENEN: usize = 0;
    /// DAC update rate.
    pub const RATE: Range<usize> = 1..9;
    /// Excitation amplifier gain 0.25.
    pub const INAMPGNMDE: usize = 12;
}

/// Fields of [`WGCON`].
pub mod wgcon {
    use std::ops::Range;

    /// Waveform type.
    pub const TYPESEL: Range<usize> = 1..3;
    /// DAC offset calibration enable.
    pub const DACOFFSETCAL: usize = 4;
    /// DAC gain calibration enable.
    pub const DACGAINCAL: usize = 5;
    /// Waveform type code for a sine wave.
    pub const TYPE_SIN: u32 = 2;
}

/// Width of the usable frequency control word in [`WGFCW`].
pub const WGFCW_MASK: u32 = 0x00FF_FFFF;
/// Accumulator width used to compute the frequency control word.
pub const WGFCW_ACCUMULATOR_BITS: i32 = 30;

////////////////////////////////////////////////////////////////////////////////
// ADC, filters, and DFT
////////////////////////////////////////////////////////////////////////////////

/// ADC filter configuration.
pub const ADCFILTERCON: u16 = 0x2044;
/// DFT result, real part (20-bit two's complement).
pub const DFTREAL: u16 = 0x2078;
/// DFT result, imaginary part.
pub const DFTIMAG: u16 = 0x207C;
/// DFT configuration.
pub const DFTCON: u16 = 0x20D0;
/// ADC configuration: input mux and PGA.
pub const ADCCON: u16 = 0x21A8;
/// Repeat ADC conversion control.
pub const REPEATADCCNV: u16 = 0x21F0;

/// Fields of [`ADCFILTERCON`].
pub mod adcfiltercon {
    use std::ops::Range;

    /// ADC data rate (1 selects 800 kHz, 0 selects 1.6 MHz).
    pub const ADCCLK: usize = 0;
    /// Bypass the 50/60 Hz notch filter.
    pub const LPFBYPEN: usize = 4;
    /// Bypass the Sinc3 filter.
    pub const SINC3BYP: usize = 6;
    /// Route the averaging block into the DFT.
    pub const AVRGEN: usize = 7;
    /// Sinc2 oversampling rate.
    pub const SINC2OSR: Range<usize> = 8..12;
    /// Sinc3 oversampling rate.
    pub const SINC3OSR: Range<usize> = 12..14;
    /// Number of samples averaged.
    pub const AVRGNUM: Range<usize> = 14..16;
    /// Sinc2/notch clock disable.
    pub const SINC2CLKENB: usize = 16;
    /// DFT clock disable.
    pub const DFTCLKENB: usize = 17;
    /// Waveform generator clock disable.
    pub const DACWAVECLKENB: usize = 18;
}

/// Fields of [`DFTCON`].
pub mod dftcon {
    use std::ops::Range;

    /// Hanning window enable.
    pub const HANNINGEN: usize = 0;
    /// DFT length code.
    pub const DFTNUM: Range<usize> = 4..8;
    /// DFT input selection.
    pub const DFTINSEL: Range<usize> = 20..22;
}

/// Fields of [`ADCCON`].
pub mod adccon {
    use std::ops::Range;

    /// Positive input mux selection.
    pub const MUXSELP: Range<usize> = 0..6;
    /// Negative input mux selection.
    pub const MUXSELN: Range<usize> = 8..13;
    /// PGA gain.
    pub const GNPGA: Range<usize> = 16..19;
}

/// Number of significant bits in [`DFTREAL`] and [`DFTIMAG`].
pub const DFT_RESULT_BITS: Range<usize> = 0..20;

////////////////////////////////////////////////////////////////////////////////
// Reference buffers and high-speed TIA
////////////////////////////////////////////////////////////////////////////////

/// Low-power reference buffer control.
pub const LPREFBUFCON: u16 = 0x2050;
/// High-speed TIA Rtia/Ctia selection.
pub const HSRTIACON: u16 = 0x20F0;
/// DE0 load and Rtia resistor selection.
pub const DE0RESCON: u16 = 0x20F8;
/// High-speed TIA bias selection.
pub const HSTIACON: u16 = 0x20FC;
/// High-power buffer control.
pub const BUFSENCON: u16 = 0x2180;

/// Bits of [`LPREFBUFCON`].
pub mod lprefbufcon {
    /// Disable the 2.5 V low-power buffer.
    pub const LPBUF2P5DIS: usize = 0;
    /// Disable the low-power bandgap.
    pub const LPREFDIS: usize = 1;
    /// Boost the low-power reference buffer current.
    pub const BOOSTCURRENT: usize = 2;
}

/// Bits of [`BUFSENCON`].
pub mod bufsencon {
    /// High-power 1.8 V reference buffer enable.
    pub const V1P8HPADCEN: usize = 0;
    /// Current limit for the high-power 1.8 V buffer.
    pub const V1P8HPADCILIMITEN: usize = 1;
    /// Low-power 1.8 V reference buffer enable.
    pub const V1P8LPADCEN: usize = 2;
    /// High-power 1.1 V reference buffer enable.
    pub const V1P1HPADCEN: usize = 4;
    /// Low-power 1.1 V reference buffer enable.
    pub const V1P1LPADCEN: usize = 5;
    /// Disconnect the 1.8 V decoupling capacitor.
    pub const V1P8HPADCCHGDIS: usize = 6;
    /// 1.8 V thermistor buffer enable.
    pub const V1P8THERMSTEN: usize = 8;
    /// Disconnect the 1.1 V decoupling capacitor.
    pub const V1P1LPADCCHGDIS: usize = 9;
}

/// Fields of [`HSRTIACON`].
pub mod hsrtiacon {
    use std::ops::Range;

    /// Rtia selection.
    pub const RTIACON: Range<usize> = 0..4;
    /// Ctia selection.
    pub const CTIACON: Range<usize> = 5..13;
    /// Close switch 6 (protection diode).
    pub const TIASW6CON: usize = 13;
}

/// Fields of [`DE0RESCON`].
pub mod de0rescon {
    use std::ops::Range;

    /// DE0 load resistor selection.
    pub const RLOAD: Range<usize> = 0..3;
    /// DE0 Rtia selection.
    pub const RTIA: Range<usize> = 3..8;
    /// Rload code for an open load.
    pub const RLOAD_OPEN: u32 = 5;
    /// Rtia code for an open resistor.
    pub const RTIA_OPEN: u32 = 0x1F;
}

////////////////////////////////////////////////////////////////////////////////
// Switch matrix
////////////////////////////////////////////////////////////////////////////////

/// D switch full control.
pub const DSWFULLCON: u16 = 0x2150;
/// N switch full control.
pub const NSWFULLCON: u16 = 0x2154;
/// P switch full control.
pub const PSWFULLCON: u16 = 0x2158;
/// T switch full control.
pub const TSWFULLCON: u16 = 0x215C;

////////////////////////////////////////////////////////////////////////////////
// Miscellaneous
////////////////////////////////////////////////////////////////////////////////

/// Calibration data lock; freely writable, used as a scratch register.
pub const CALDATLOCK: u16 = 0x2230;
/// Power mode and bandwidth.
pub const PMBW: u16 = 0x22F0;

////////////////////////////////////////////////////////////////////////////////
// Interrupt controller
////////////////////////////////////////////////////////////////////////////////

/// Write 1 to clear interrupt flags.
pub const INTCCLR: u16 = 0x3004;
/// Interrupt controller 0 source selection.
pub const INTCSEL0: u16 = 0x3008;
/// Interrupt controller 1 source selection.
pub const INTCSEL1: u16 = 0x300C;
/// Interrupt controller 0 flags.
pub const INTCFLAG0: u16 = 0x3010;
/// Interrupt controller 1 flags.
pub const INTCFLAG1: u16 = 0x3014;

/// Register writes performed once after reset, in order.
///
/// These configure clocks, internal bus interrupts, and power-up trims that
/// the device needs before any AFE block is used.
pub const STARTUP_TABLE: [(u16, u32); 9] = [
    (0x0908, 0x02C9),
    (REPEATADCCNV, 0x0010),
    (CLKEN1, 0x02C9),
    (0x238C, 0x0104),
    (EI2CON, 0x0009),
    (0x0A04, 0x4859),
    (0x0A04, 0xF27B),
    (0x0A00, 0x8009),
    (PMBW, 0x0000),
];
