//! Byte-stream link to the serial bridge.
//!
//! The bridge firmware speaks the register protocol over a plain UART, so any
//! 8-bit-clean, flow-control-free byte stream will do. [`Transport`] is the
//! seam between the protocol layers and the physical link: a blocking
//! [`Read`] + [`Write`] whose reads give up after a configurable timeout.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::Error;

/// Default baud rate of the bridge firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Blocking byte stream carrying the register protocol.
///
/// Reads must block until at least one byte is available or the read timeout
/// expires, in which case they return an error of kind
/// [`io::ErrorKind::TimedOut`] (or [`io::ErrorKind::WouldBlock`]).
pub trait Transport: Read + Write {
    /// Set how long a single read may wait for data.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any bytes received but not yet read, and any bytes written
    /// but not yet transmitted.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

/// Open a serial port for the bridge: 8 data bits, no parity, one stop bit,
/// no flow control.
///
/// # Errors
///
/// An error will be returned if the port cannot be opened or configured.
pub fn open_serial(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, Error> {
    let port = serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open()?;
    log::debug!("opened {path} at {baud_rate} baud");
    Ok(port)
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted byte stream for unit tests.
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use super::Transport;

    /// Hands out pre-loaded bytes one read at a time and records writes.
    ///
    /// Once the script is exhausted, reads time out.
    #[derive(Debug, Default)]
    pub(crate) struct Scripted {
        pub(crate) incoming: VecDeque<u8>,
        pub(crate) written: Vec<u8>,
        pub(crate) timeout: Option<Duration>,
    }

    impl Scripted {
        pub(crate) fn new(incoming: &[u8]) -> Self {
            Self {
                incoming: incoming.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub(crate) fn push(&mut self, bytes: &[u8]) {
            self.incoming.extend(bytes);
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            match self.incoming.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(1)
                }
                None => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Scripted {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = Some(timeout);
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.incoming.clear();
            Ok(())
        }
    }
}
