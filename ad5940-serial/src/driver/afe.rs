use bit_field::BitField;

use super::Ad5940;
use crate::afe::{
    AdcBaseConfig, AdcFilterConfig, AdcMuxN, AdcMuxP, AdcRate, AfeBlocks, DftConfig, DftSource,
    DspConfig, ExcitationBufferGain, HsDacConfig, HsDacGain, HsLoopConfig, HsTiaConfig,
    InterruptController, InterruptSource, ReferenceConfig, SwitchMatrix, WaveformConfig,
};
use crate::error::FirstFailure;
use crate::registers::{
    ADCCON, ADCFILTERCON, AFECON, BUFSENCON, DE0RESCON, DFTCON, DSWFULLCON, HSDACCON, HSRTIACON,
    HSTIACON, INTCCLR, INTCFLAG0, INTCFLAG1, INTCSEL0, INTCSEL1, LPREFBUFCON, NSWFULLCON,
    PSWFULLCON, SWCON, TSWFULLCON, WGAMPLITUDE, WGCON, WGFCW, WGOFFSET, WGPHASE, adccon,
    adcfiltercon, afecon, bufsencon, de0rescon, dftcon, hsdaccon, hsrtiacon, lprefbufcon, swcon,
    wgcon,
};
use crate::transport::Transport;
use crate::Error;

impl<T: Transport> Ad5940<T> {
    ////////////////////////////////////////////////////////////////////////////////
    // Block control
    ////////////////////////////////////////////////////////////////////////////////

    /// Enable (`true`) or disable (`false`) a set of AFE blocks.
    ///
    /// AFECON is read, modified, and written back, so blocks not named in
    /// `blocks` keep their state. The high-power reference and the analog LDO
    /// current limit have inverted control bits, which this method accounts
    /// for.
    pub fn afe_ctrl(&mut self, blocks: AfeBlocks, enable: bool) -> Result<(), Error> {
        let mut afecon = self.read_register(AFECON)?;
        let inverted = [
            (AfeBlocks::HP_REFERENCE, afecon::HPREFDIS),
            (AfeBlocks::ALDO_LIMIT, afecon::ALDOILIMITEN),
        ];
        let mut direct = blocks;
        for (block, bit) in inverted {
            if blocks.contains(block) {
                afecon.set_bit(bit, !enable);
                direct = direct.without(block);
            }
        }
        if enable {
            afecon |= direct.bits();
        } else {
            afecon &= !direct.bits();
        }
        self.write_register(AFECON, afecon)
    }

    ////////////////////////////////////////////////////////////////////////////////
    // References
    ////////////////////////////////////////////////////////////////////////////////

    /// Configure the high-power and low-power voltage references.
    pub fn afe_reference(&mut self, config: &ReferenceConfig) -> Result<(), Error> {
        let mut afecon = self.read_register(AFECON)?;
        afecon.set_bit(afecon::HPREFDIS, !config.hp_bandgap);
        self.write_register(AFECON, afecon)?;

        let mut bufsencon = self.read_register(BUFSENCON)?;
        bufsencon
            .set_bit(bufsencon::V1P8HPADCEN, config.hp_1v8_buffer)
            .set_bit(bufsencon::V1P1HPADCEN, config.hp_1v1_buffer)
            .set_bit(bufsencon::V1P8LPADCEN, config.lp_1v8_buffer)
            .set_bit(bufsencon::V1P1LPADCEN, config.lp_1v1_buffer)
            .set_bit(bufsencon::V1P8THERMSTEN, config.hp_1v8_thermistor_buffer)
            .set_bit(bufsencon::V1P8HPADCILIMITEN, config.hp_1v8_current_limit)
            .set_bit(bufsencon::V1P8HPADCCHGDIS, config.disconnect_1v8_cap)
            .set_bit(bufsencon::V1P1LPADCCHGDIS, config.disconnect_1v1_cap);
        self.write_register(BUFSENCON, bufsencon)?;

        let mut lprefbufcon = 0u32;
        lprefbufcon
            .set_bit(lprefbufcon::LPBUF2P5DIS, !config.lp_reference_buffer)
            .set_bit(lprefbufcon::LPREFDIS, !config.lp_bandgap)
            .set_bit(lprefbufcon::BOOSTCURRENT, config.lp_reference_boost);
        self.write_register(LPREFBUFCON, lprefbufcon)
    }

    ////////////////////////////////////////////////////////////////////////////////
    // High-speed loop
    ////////////////////////////////////////////////////////////////////////////////

    /// Configure the high-speed DAC gains and update rate.
    pub fn afe_hs_dac(&mut self, config: &HsDacConfig) -> Result<(), Error> {
        let mut hsdaccon = 0u32;
        hsdaccon
            .set_bit(
                hsdaccon::INAMPGNMDE,
                config.buffer_gain == ExcitationBufferGain::X0_25,
            )
            .set_bit(hsdaccon::ATTENEN, config.dac_gain == HsDacGain::X0_2)
            .set_bits(hsdaccon::RATE, u32::from(config.update_rate));
        self.write_register(HSDACCON, hsdaccon)
    }

    /// Configure the high-speed TIA bias and feedback network.
    ///
    /// The DE0 load and Rtia resistors are left open.
    pub fn afe_hs_tia(&mut self, config: &HsTiaConfig) -> Result<(), Error> {
        self.write_register(HSTIACON, config.bias.into())?;

        let mut hsrtiacon = 0u32;
        hsrtiacon
            .set_bits(hsrtiacon::RTIACON, config.rtia.into())
            .set_bits(hsrtiacon::CTIACON, u32::from(config.ctia_pf))
            .set_bit(hsrtiacon::TIASW6CON, config.diode_close);
        self.write_register(HSRTIACON, hsrtiacon)?;

        let mut de0rescon = 0u32;
        de0rescon
            .set_bits(de0rescon::RTIA, de0rescon::RTIA_OPEN)
            .set_bits(de0rescon::RLOAD, de0rescon::RLOAD_OPEN);
        self.write_register(DE0RESCON, de0rescon)
    }

    /// Set the full state of the switch matrix.
    pub fn afe_switch_matrix(&mut self, switches: &SwitchMatrix) -> Result<(), Error> {
        self.write_register(DSWFULLCON, switches.d)?;
        self.write_register(PSWFULLCON, switches.p)?;
        self.write_register(NSWFULLCON, switches.n)?;
        self.write_register(TSWFULLCON, switches.t)?;
        self.write_register(SWCON, 1 << swcon::SWSOURCESEL)
    }

    /// Configure the waveform generator for sine output.
    pub fn afe_waveform(&mut self, config: &WaveformConfig) -> Result<(), Error> {
        let sine = &config.sine;
        self.write_register(WGFCW, sine.frequency_word)?;
        self.write_register(WGAMPLITUDE, sine.amplitude_word)?;
        self.write_register(WGOFFSET, sine.offset_word)?;
        self.write_register(WGPHASE, sine.phase_word)?;

        let mut wgcon_value = 0u32;
        wgcon_value
            .set_bit(wgcon::DACGAINCAL, config.gain_calibration)
            .set_bit(wgcon::DACOFFSETCAL, config.offset_calibration)
            .set_bits(wgcon::TYPESEL, wgcon::TYPE_SIN);
        self.write_register(WGCON, wgcon_value)
    }

    /// Configure the whole high-speed loop.
    ///
    /// Every block is configured even if an earlier one fails; the first
    /// failure is returned.
    pub fn afe_hs_loop(&mut self, config: &HsLoopConfig) -> Result<(), Error> {
        let mut batch = FirstFailure::new();
        batch.record(self.afe_hs_dac(&config.dac));
        batch.record(self.afe_hs_tia(&config.tia));
        batch.record(self.afe_switch_matrix(&config.switches));
        batch.record(self.afe_waveform(&config.waveform));
        batch.into_result()
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Digital signal path
    ////////////////////////////////////////////////////////////////////////////////

    /// Configure the ADC input mux and PGA.
    pub fn afe_adc_base(&mut self, config: &AdcBaseConfig) -> Result<(), Error> {
        let mut adccon_value = 0u32;
        adccon_value
            .set_bits(adccon::MUXSELP, config.mux_p.into())
            .set_bits(adccon::MUXSELN, config.mux_n.into())
            .set_bits(adccon::GNPGA, config.pga.into());
        self.write_register(ADCCON, adccon_value)
    }

    /// Configure the ADC digital filters.
    ///
    /// The averaging-enable bit belongs to the DFT configuration and is
    /// preserved.
    pub fn afe_adc_filter(&mut self, config: &AdcFilterConfig) -> Result<(), Error> {
        let current = self.read_register(ADCFILTERCON)?;
        let mut filter = 0u32;
        filter
            .set_bit(adcfiltercon::AVRGEN, current.get_bit(adcfiltercon::AVRGEN))
            .set_bit(adcfiltercon::ADCCLK, config.rate == AdcRate::Khz800)
            .set_bit(adcfiltercon::LPFBYPEN, config.bypass_notch)
            .set_bit(adcfiltercon::SINC3BYP, config.bypass_sinc3)
            .set_bits(adcfiltercon::SINC2OSR, config.sinc2_osr.into())
            .set_bits(adcfiltercon::SINC3OSR, config.sinc3_osr.into())
            .set_bits(adcfiltercon::AVRGNUM, config.average.into())
            .set_bit(adcfiltercon::SINC2CLKENB, !config.sinc2_notch_clock)
            .set_bit(adcfiltercon::DACWAVECLKENB, !config.waveform_clock)
            .set_bit(adcfiltercon::DFTCLKENB, !config.dft_clock);
        self.write_register(ADCFILTERCON, filter)?;

        if config.sinc2_notch {
            self.afe_ctrl(AfeBlocks::SINC2_NOTCH, true)?;
        }
        Ok(())
    }

    /// Configure the DFT engine.
    pub fn afe_dft(&mut self, config: &DftConfig) -> Result<(), Error> {
        let mut filter = self.read_register(ADCFILTERCON)?;
        filter.set_bit(adcfiltercon::AVRGEN, config.source == DftSource::Average);
        self.write_register(ADCFILTERCON, filter)?;

        let mut dftcon_value = 0u32;
        let insel = match config.source {
            DftSource::Sinc2Notch => 0,
            DftSource::Sinc3 => 1,
            DftSource::AdcRaw => 2,
            // Averaged data is routed by AVRGEN, not by the input select.
            DftSource::Average => 0,
        };
        dftcon_value
            .set_bits(dftcon::DFTINSEL, insel)
            .set_bits(dftcon::DFTNUM, config.length.into())
            .set_bit(dftcon::HANNINGEN, config.hanning);
        self.write_register(DFTCON, dftcon_value)
    }

    /// Configure the whole digital signal path.
    ///
    /// Every block is configured even if an earlier one fails; the first
    /// failure is returned.
    pub fn afe_dsp(&mut self, config: &DspConfig) -> Result<(), Error> {
        let mut batch = FirstFailure::new();
        batch.record(self.afe_adc_base(&config.adc));
        batch.record(self.afe_adc_filter(&config.filter));
        batch.record(self.afe_dft(&config.dft));
        batch.into_result()
    }

    /// Change only the ADC input mux, leaving the PGA setting alone.
    pub fn afe_adc_mux(&mut self, mux_p: AdcMuxP, mux_n: AdcMuxN) -> Result<(), Error> {
        let mut adccon_value = self.read_register(ADCCON)?;
        adccon_value
            .set_bits(adccon::MUXSELP, mux_p.into())
            .set_bits(adccon::MUXSELN, mux_n.into());
        self.write_register(ADCCON, adccon_value)
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Interrupt controller
    ////////////////////////////////////////////////////////////////////////////////

    /// Route (`true`) or unroute (`false`) interrupt sources to a controller.
    pub fn afe_interrupt_enable(
        &mut self,
        controller: InterruptController,
        sources: InterruptSource,
        enable: bool,
    ) -> Result<(), Error> {
        let address = match controller {
            InterruptController::Intc0 => INTCSEL0,
            InterruptController::Intc1 => INTCSEL1,
        };
        let mut selected = self.read_register(address)?;
        if enable {
            selected |= sources.bits();
        } else {
            selected &= !sources.bits();
        }
        self.write_register(address, selected)
    }

    /// Clear interrupt flags.
    pub fn afe_interrupt_clear(&mut self, sources: InterruptSource) -> Result<(), Error> {
        self.write_register(INTCCLR, sources.bits())
    }

    /// Whether any of `sources` is flagged on `controller`.
    pub fn afe_interrupt_flag(
        &mut self,
        controller: InterruptController,
        sources: InterruptSource,
    ) -> Result<bool, Error> {
        let address = match controller {
            InterruptController::Intc0 => INTCFLAG0,
            InterruptController::Intc1 => INTCFLAG1,
        };
        Ok(self.read_register(address)? & sources.bits() != 0)
    }
}
