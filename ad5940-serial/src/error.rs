use std::time::Duration;

/// Wrapper for problems when talking to the AD5940 through the serial bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading from or writing to the byte stream failed.
    #[error("serial transport failed: {0}")]
    Transport(#[from] std::io::Error),
    /// The serial port could not be opened or configured.
    #[error("could not open serial port: {0}")]
    Serial(#[from] serialport::Error),
    /// No complete message could be extracted from the byte stream.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// A message was received but could not be accepted as the reply to the
    /// request just sent.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The bridge answered the request with an in-band error.
    ///
    /// The enclosed string is the remote diagnostic, rendered as JSON text if
    /// it was not itself a string.
    #[error("device reported an error: {0}")]
    Remote(String),
    /// Both DFT result registers were still zero after the poll budget was
    /// spent.
    ///
    /// A DFT component that is legitimately zero cannot be told apart from a
    /// result that is not ready yet, so this may also be reported for a real
    /// measurement with a zero real or imaginary part.
    #[error("DFT result not ready after {attempts} polls")]
    AcquisitionTimeout {
        /// Number of read attempts made.
        attempts: u32,
    },
    /// One or more register-level calls of a configuration batch failed.
    ///
    /// Every step of the batch was still attempted. `source` is the first
    /// failure encountered.
    #[error("{step} failed: {source}")]
    Configuration {
        /// Name of the batch operation.
        step: &'static str,
        /// First underlying failure.
        source: Box<Error>,
    },
    /// A configuration record cannot be applied as given.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// The wait for the DFT-ready interrupt flag was cancelled.
    #[error("wait for DFT ready flag was cancelled")]
    Cancelled,
    /// An impedance measurement was attempted before an Rtia calibration value
    /// was available.
    #[error("no Rtia calibration value available")]
    NotCalibrated,
    /// The identification registers did not match an AD5940/AD5941.
    #[error("unexpected chip identification (ADIID {adiid:#06X}, CHIPID {chipid:#06X})")]
    UnknownDevice {
        /// Value read from ADIID.
        adiid: u32,
        /// Value read from CHIPID.
        chipid: u32,
    },
}

/// Failure to extract one brace-delimited message from the byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The deadline passed before a complete message arrived.
    ///
    /// `captured` is the number of message bytes seen so far (zero means
    /// nothing but noise, or nothing at all, was received).
    #[error("no complete message within {deadline:?} ({captured} bytes captured)")]
    Timeout {
        /// Deadline that was exceeded.
        deadline: Duration,
        /// Bytes captured before giving up.
        captured: usize,
    },
    /// The stream ended before a complete message arrived.
    #[error("stream ended after {captured} message bytes")]
    EndOfStream {
        /// Bytes captured before the stream ended.
        captured: usize,
    },
    /// The message did not fit in the frame buffer.
    #[error("message exceeds frame capacity of {capacity} bytes")]
    Overflow {
        /// Capacity of the frame buffer.
        capacity: usize,
    },
}

/// A framed message was not an acceptable reply.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The message was not a well-formed JSON object.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The `id` field was absent or not a number.
    #[error("response id missing or not numeric")]
    MissingId,
    /// The `id` field did not match the id of the request just sent.
    #[error("response id mismatch (expected {expected}, got {received})")]
    IdMismatch {
        /// Id of the request just sent.
        expected: u32,
        /// Id found in the response, as JSON text.
        received: String,
    },
    /// The response had neither an error nor a result of the expected type.
    #[error("no valid {expected} result in response")]
    MissingResult {
        /// Description of the expected result type.
        expected: &'static str,
    },
    /// An acknowledgement string was received but did not match.
    #[error("unexpected acknowledgement (expected {expected:?}, got {received:?})")]
    UnexpectedAck {
        /// Literal the caller expected.
        expected: &'static str,
        /// String received instead.
        received: String,
    },
}

/// Collects the outcome of a batch of calls that are all attempted even if an
/// earlier one failed.
///
/// The first failure is kept. Later failures are logged and dropped.
#[derive(Debug, Default)]
pub(crate) struct FirstFailure(Option<Error>);

impl FirstFailure {
    pub(crate) fn new() -> Self {
        Self(None)
    }

    /// Record the result of one step, handing back its value on success.
    pub(crate) fn record<T>(&mut self, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                match self.0 {
                    None => self.0 = Some(e),
                    Some(_) => log::debug!("suppressed secondary failure: {e}"),
                }
                None
            }
        }
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.0.is_some()
    }

    /// Finish the batch, wrapping the first failure (if any) as a
    /// configuration error for `step`.
    pub(crate) fn finish(self, step: &'static str) -> Result<(), Error> {
        match self.0 {
            None => Ok(()),
            Some(e) => Err(Error::Configuration {
                step,
                source: Box::new(e),
            }),
        }
    }

    /// Finish the batch, returning the first failure unchanged.
    pub(crate) fn into_result(self) -> Result<(), Error> {
        match self.0 {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
