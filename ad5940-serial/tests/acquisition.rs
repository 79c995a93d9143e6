//! DFT acquisition edge cases against the simulated bridge.
mod common;

use ad5940_serial::afe::AfeBlocks;
use ad5940_serial::dft::{AcquisitionMode, CancelToken, ComplexSample};
use ad5940_serial::registers::{AFECON, DFTREAL, INTCFLAG1};
use ad5940_serial::{Ad5940, Error};
use common::{SimulatedBridge, init_logging, raw};
use embedded_hal::delay::DelayNs;

fn driver(bridge: SimulatedBridge) -> Ad5940<SimulatedBridge> {
    init_logging();
    Ad5940::new(bridge).unwrap()
}

const INTERRUPT: AcquisitionMode = AcquisitionMode::Interrupt { poll_interval_us: 0 };

/// Blocks an acquisition switches on and must switch off again.
fn acquisition_blocks() -> u32 {
    (AfeBlocks::WAVEFORM_GENERATOR
        | AfeBlocks::ADC_POWER
        | AfeBlocks::ADC_CONVERSION
        | AfeBlocks::DFT)
        .bits()
}

fn reads_of(bridge: &SimulatedBridge, address: u16) -> usize {
    bridge
        .requests
        .iter()
        .filter(|r| r["method"] == "rd" && r["params"]["address"] == u64::from(address))
        .count()
}

/// Does not wait at all.
struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Cancels `token` on its n-th pause.
struct CancelAfter {
    token: CancelToken,
    pauses: u32,
}

impl DelayNs for CancelAfter {
    fn delay_ns(&mut self, _ns: u32) {}

    fn delay_us(&mut self, _us: u32) {
        self.pauses = self.pauses.saturating_sub(1);
        if self.pauses == 0 {
            self.token.cancel();
        }
    }
}

/// Interrupt mode reads the result once the ready flag is raised.
#[test]
fn interrupt_mode_reads_result() -> Result<(), Error> {
    let mut bridge = SimulatedBridge::new();
    bridge.push_dft(raw(-100), 50);
    let mut afe = driver(bridge);

    let sample = afe.acquire_dft(INTERRUPT, &mut NoDelay, &CancelToken::new())?;
    assert_eq!(sample, ComplexSample { real: -100, imag: 50 });
    assert_eq!(afe.session().transport().register(AFECON) & acquisition_blocks(), 0);
    Ok(())
}

/// A wait that never sees the flag ends when the token is cancelled, and the
/// blocks are switched off.
#[test]
fn interrupt_wait_is_cancelled() {
    let mut bridge = SimulatedBridge::new();
    bridge.push_stalled_dft();
    let mut afe = driver(bridge);
    let token = CancelToken::new();
    let mut delay = CancelAfter {
        token: token.clone(),
        pauses: 3,
    };

    assert!(matches!(
        afe.acquire_dft(INTERRUPT, &mut delay, &token),
        Err(Error::Cancelled)
    ));
    let bridge = afe.session().transport();
    assert_eq!(reads_of(bridge, INTCFLAG1), 3);
    assert_eq!(bridge.register(AFECON) & acquisition_blocks(), 0);
}

/// A result register that cannot be read fails polling, and the blocks are
/// still switched off.
#[test]
fn polling_read_failure_powers_down() {
    let mut bridge = SimulatedBridge::new();
    bridge.push_dft(1, 1);
    bridge.failing_reads.insert(DFTREAL);
    let mut afe = driver(bridge);

    let result = afe.acquire_dft(
        AcquisitionMode::Polling { max_attempts: 5 },
        &mut NoDelay,
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::Remote(ref text)) if text == "read of 0x2078 failed"));

    let bridge = afe.session().transport();
    assert_eq!(reads_of(bridge, DFTREAL), 1);
    assert_eq!(bridge.register(AFECON) & acquisition_blocks(), 0);
    let last = bridge.requests.last().unwrap();
    assert_eq!(last["method"], "wr");
    assert_eq!(last["params"]["address"], u64::from(AFECON));
}

/// A flag register that cannot be read fails the interrupt wait, and the
/// blocks are still switched off.
#[test]
fn interrupt_flag_failure_powers_down() {
    let mut bridge = SimulatedBridge::new();
    bridge.push_dft(1, 1);
    bridge.failing_reads.insert(INTCFLAG1);
    let mut afe = driver(bridge);

    assert!(matches!(
        afe.acquire_dft(INTERRUPT, &mut NoDelay, &CancelToken::new()),
        Err(Error::Remote(_))
    ));
    let bridge = afe.session().transport();
    assert_eq!(reads_of(bridge, INTCFLAG1), 1);
    assert_eq!(reads_of(bridge, DFTREAL), 0);
    assert_eq!(bridge.register(AFECON) & acquisition_blocks(), 0);
}
