use std::time::Duration;

use serialport::SerialPort;

use crate::afe::{AfeBlocks, InterruptController, InterruptSource};
use crate::error::Error;
use crate::registers::{
    ADIID, ADIID_VALUE, CHIPID, CHIPID_PART, CHIPID_PART_MASK, STARTUP_TABLE,
};
use crate::rpc::{DEFAULT_TIMEOUT, Method, Params, Session};
use crate::transport::{Transport, open_serial};

mod afe;
mod rtia;

pub use rtia::{RtiaCalConfig, RtiaCalibration};

/// Driver for an AD5940/AD5941 reached through the serial register bridge.
///
/// # Quick start
///
/// Open the serial port with [`Ad5940::connect`], then bring the chip up with
/// [`Ad5940::initialize`]. After that, registers can be accessed directly, or
/// an [`ImpedanceApp`](crate::ImpedanceApp) can drive complete measurements.
///
/// ```no_run
/// use ad5940_serial::{Ad5940, ImpedanceApp};
///
/// let mut afe = Ad5940::connect("/dev/ttyUSB0", 115_200)?;
/// let chip = afe.initialize()?;
/// println!("silicon revision {}", chip.revision);
///
/// let mut app = ImpedanceApp::default();
/// app.calibrate(&mut afe)?;
/// app.configure(&mut afe)?;
/// let z = app.measure(&mut afe)?;
/// println!("{:.1} Ω at {:.3} rad", z.norm(), z.arg());
/// # Ok::<(), ad5940_serial::Error>(())
/// ```
///
/// # Overview
///
/// Every method issues one or more synchronous calls over the link. Only one
/// call is ever in flight, which is why everything takes `&mut self`. No call
/// is retried: a failure is returned to the caller as soon as it happens.
///
/// The register access methods map one-to-one onto the bridge's methods. The
/// AFE configuration methods (`afe_*`) each apply one configuration record
/// with a batch of register accesses.
#[derive(Debug)]
pub struct Ad5940<T> {
    session: Session<T>,
}

/// Identification read back from the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipInfo {
    /// Content of the ADIID register.
    pub adiid: u32,
    /// Content of the CHIPID register.
    pub chipid: u32,
    /// Silicon revision (low nibble of CHIPID).
    pub revision: u8,
}

impl Ad5940<Box<dyn SerialPort>> {
    ////////////////////////////////////////////////////////////////////////////////
    // Constructors - serial port
    ////////////////////////////////////////////////////////////////////////////////

    /// Open the serial port at `path` and wrap it in a driver with the default
    /// response timeout.
    ///
    /// # Errors
    ///
    /// An error will be returned if the port cannot be opened or configured.
    pub fn connect(path: &str, baud_rate: u32) -> Result<Self, Error> {
        Self::connect_with_timeout(path, baud_rate, DEFAULT_TIMEOUT)
    }

    /// Open the serial port at `path` with a custom response timeout.
    ///
    /// # Errors
    ///
    /// An error will be returned if the port cannot be opened or configured.
    pub fn connect_with_timeout(
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, Error> {
        Self::with_timeout(open_serial(path, baud_rate)?, timeout)
    }
}

impl<T: Transport> Ad5940<T> {
    ////////////////////////////////////////////////////////////////////////////////
    // Constructors - any transport
    ////////////////////////////////////////////////////////////////////////////////

    /// Wrap an already open transport, using the default response timeout.
    pub fn new(transport: T) -> Result<Self, Error> {
        Self::with_timeout(transport, DEFAULT_TIMEOUT)
    }

    /// Wrap an already open transport with a custom response timeout.
    pub fn with_timeout(transport: T, timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            session: Session::new(transport, timeout)?,
        })
    }

    /// The underlying protocol session.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Release the transport.
    pub fn into_transport(self) -> T {
        self.session.into_transport()
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Register access
    ////////////////////////////////////////////////////////////////////////////////

    /// Hardware reset of the AFE.
    ///
    /// Anything the bridge sent while the chip restarted is discarded once the
    /// reset is acknowledged.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.session.call_ack(Method::Reset, Params::none())?;
        self.session.clear_input()
    }

    /// Read the register at `address`.
    pub fn read_register(&mut self, address: u16) -> Result<u32, Error> {
        self.session.call_number(Method::Read, Params::address(address))
    }

    /// Write `value` to the register at `address`.
    pub fn write_register(&mut self, address: u16, value: u32) -> Result<(), Error> {
        self.session
            .call_ack(Method::Write, Params::address_data(address, value))
    }

    /// Set the bits of `mask` in the register at `address`.
    ///
    /// The read-modify-write happens on the bridge.
    pub fn set_bits(&mut self, address: u16, mask: u32) -> Result<(), Error> {
        self.session
            .call_ack(Method::SetBits, Params::address_data(address, mask))
    }

    /// Clear the bits of `mask` in the register at `address`.
    pub fn clear_bits(&mut self, address: u16, mask: u32) -> Result<(), Error> {
        self.session
            .call_ack(Method::ClearBits, Params::address_data(address, mask))
    }

    /// Replace the bits of `mask` in the register at `address` with the
    /// corresponding bits of `value`.
    pub fn write_masked(&mut self, address: u16, mask: u32, value: u32) -> Result<(), Error> {
        self.session
            .call_ack(Method::WriteMasked, Params::masked(address, mask, value))
    }

    /// Read up to `count` words from the data FIFO.
    ///
    /// The returned vector is never longer than `count`, but may be shorter if
    /// the bridge had fewer words available.
    pub fn read_fifo(&mut self, count: u32) -> Result<Vec<u32>, Error> {
        let limit = usize::try_from(count).unwrap_or(usize::MAX);
        self.session
            .call_array(Method::ReadFifo, Params::readcount(count), limit)
    }

    ////////////////////////////////////////////////////////////////////////////////
    // Bring-up
    ////////////////////////////////////////////////////////////////////////////////

    /// Check that the chip on the other end is an AD5940 or AD5941.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDevice`] if ADIID or the part id in CHIPID do not
    /// match.
    pub fn identify(&mut self) -> Result<ChipInfo, Error> {
        let adiid = self.read_register(ADIID)?;
        let chipid = self.read_register(CHIPID)?;
        if adiid != ADIID_VALUE || chipid & CHIPID_PART_MASK != CHIPID_PART {
            log::error!("unknown device: ADIID {adiid:#06X}, CHIPID {chipid:#06X}");
            return Err(Error::UnknownDevice { adiid, chipid });
        }
        let info = ChipInfo {
            adiid,
            chipid,
            revision: (chipid & 0xF) as u8,
        };
        log::info!("AD5940 detected, silicon revision {}", info.revision);
        Ok(info)
    }

    /// Reset the chip, identify it, and prepare it for high-speed
    /// measurements.
    ///
    /// After the start-up register table is written, every interrupt source
    /// is routed to interrupt controller 1, all flags are cleared, and the
    /// high-speed reference, TIA, and DAC blocks are powered.
    ///
    /// # Errors
    ///
    /// Stops at the first failed step.
    pub fn initialize(&mut self) -> Result<ChipInfo, Error> {
        self.reset()?;
        let info = self.identify()?;
        for (address, value) in STARTUP_TABLE {
            self.write_register(address, value)?;
        }
        self.afe_interrupt_enable(InterruptController::Intc1, InterruptSource::ALL, true)?;
        self.afe_interrupt_clear(InterruptSource::ALL)?;
        self.afe_ctrl(AfeBlocks::HS_LOOP, true)?;
        log::debug!("initialisation complete");
        Ok(info)
    }
}
