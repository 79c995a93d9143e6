//! Request/response exchanges with the bridge firmware.
//!
//! Each logical register operation is a single JSON method call:
//!
//! ```text
//! -> {"method":"wr","params":{"address":8752,"data":305419896},"id":7}
//! <- {"id":7,"result":"done"}
//! ```
//!
//! Only one call is ever outstanding. A reply is accepted only if it carries
//! the id of the call just sent; anything else is rejected rather than held
//! for a later call, since the protocol has no pipelining.

use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::framing::{self, FIFO_FRAME_CAPACITY, FRAME_CAPACITY};
use crate::transport::Transport;
use crate::Error;

/// Default time allowed for the bridge to answer a call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Acknowledgement returned by calls that produce no value.
pub const ACK: &str = "done";

/// The fixed set of methods understood by the bridge firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    /// Hardware reset of the AFE.
    #[serde(rename = "reset")]
    Reset,
    /// Read a register.
    #[serde(rename = "rd")]
    Read,
    /// Write a register.
    #[serde(rename = "wr")]
    Write,
    /// Set the bits of a mask in a register.
    #[serde(rename = "set_bits")]
    SetBits,
    /// Clear the bits of a mask in a register.
    #[serde(rename = "clr_bits")]
    ClearBits,
    /// Replace the bits of a mask in a register.
    #[serde(rename = "wr_mask")]
    WriteMasked,
    /// Read words from the data FIFO.
    #[serde(rename = "rd_fifo")]
    ReadFifo,
}

impl Method {
    /// Method name as it appears on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Method::Reset => "reset",
            Method::Read => "rd",
            Method::Write => "wr",
            Method::SetBits => "set_bits",
            Method::ClearBits => "clr_bits",
            Method::WriteMasked => "wr_mask",
            Method::ReadFifo => "rd_fifo",
        }
    }

    /// Capacity of the frame buffer used for this method's reply.
    fn frame_capacity(self) -> usize {
        match self {
            Method::ReadFifo => FIFO_FRAME_CAPACITY,
            _ => FRAME_CAPACITY,
        }
    }
}

/// Parameters of a method call. Absent fields are not sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Params {
    /// Register address (`rd`, `wr`, `set_bits`, `clr_bits`, `wr_mask`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    /// Mask of the bits to replace (`wr_mask`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<u32>,
    /// Value to write, or mask for `set_bits` / `clr_bits`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<u32>,
    /// Number of FIFO words requested (`rd_fifo`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readcount: Option<u32>,
}

impl Params {
    /// No parameters.
    pub fn none() -> Self {
        Self::default()
    }

    /// Only a register address.
    pub fn address(address: u16) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }

    /// A register address and a data word.
    pub fn address_data(address: u16, data: u32) -> Self {
        Self {
            address: Some(address),
            data: Some(data),
            ..Self::default()
        }
    }

    /// A register address, a mask, and a data word.
    pub fn masked(address: u16, mask: u32, data: u32) -> Self {
        Self {
            address: Some(address),
            mask: Some(mask),
            data: Some(data),
            ..Self::default()
        }
    }

    /// A FIFO read count.
    pub fn readcount(count: u32) -> Self {
        Self {
            readcount: Some(count),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One method call, as serialised onto the wire.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MethodCall {
    /// Method to invoke.
    pub method: Method,
    /// Method parameters. Omitted entirely when empty.
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    /// Correlation id.
    pub id: u32,
}

impl MethodCall {
    /// Serialise to the compact JSON text sent to the bridge.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serialising plain integers and fixed strings into a Vec cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A reply as received, before it is checked against the call.
#[derive(Debug, Deserialize)]
pub struct Response {
    /// Correlation id echoed by the bridge.
    #[serde(default)]
    pub id: Option<Value>,
    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    /// Parse a framed message.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Malformed`] if the message is not a JSON object.
    pub fn parse(frame: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e).into())
    }

    /// Check the correlation id and the error field, returning the result
    /// payload.
    fn into_result(self, expected_id: u32) -> Result<Value, Error> {
        let received = match self.id {
            Some(Value::Number(n)) => n,
            _ => return Err(ProtocolError::MissingId.into()),
        };
        if received.as_u64() != Some(u64::from(expected_id)) {
            return Err(ProtocolError::IdMismatch {
                expected: expected_id,
                received: received.to_string(),
            }
            .into());
        }
        if let Some(error) = self.error {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(Error::Remote(message));
        }
        self.result.ok_or_else(|| {
            ProtocolError::MissingResult {
                expected: "any",
            }
            .into()
        })
    }

    /// Decode a scalar numeric result.
    pub fn into_number(self, expected_id: u32) -> Result<u32, Error> {
        match self.into_result(expected_id)? {
            Value::Number(n) => Ok(number_to_u32(&n)),
            _ => Err(ProtocolError::MissingResult { expected: "numeric" }.into()),
        }
    }

    /// Decode an acknowledgement that must equal `literal` exactly.
    pub fn into_ack(self, expected_id: u32, literal: &'static str) -> Result<(), Error> {
        match self.into_result(expected_id)? {
            Value::String(s) if s == literal => Ok(()),
            Value::String(s) => Err(ProtocolError::UnexpectedAck {
                expected: literal,
                received: s,
            }
            .into()),
            _ => Err(ProtocolError::MissingResult { expected: "string" }.into()),
        }
    }

    /// Decode an array result, keeping at most `limit` entries.
    ///
    /// Entries that are not numbers are returned as zero.
    pub fn into_array(self, expected_id: u32, limit: usize) -> Result<Vec<u32>, Error> {
        match self.into_result(expected_id)? {
            Value::Array(items) => Ok(items
                .iter()
                .take(limit)
                .map(|item| match item {
                    Value::Number(n) => number_to_u32(n),
                    _ => 0,
                })
                .collect()),
            _ => Err(ProtocolError::MissingResult { expected: "array" }.into()),
        }
    }
}

/// Coerce a JSON number to an unsigned 32-bit register word.
///
/// Fractional values are truncated and out-of-range values saturate. This
/// deliberately differs from the bridge firmware's plain `(uint32_t)` cast,
/// which is undefined in C for negative or oversized values.
fn number_to_u32(n: &serde_json::Number) -> u32 {
    match n.as_u64() {
        Some(v) => u32::try_from(v).unwrap_or(u32::MAX),
        None => n.as_f64().map_or(0, |v| v as u32),
    }
}

/// A synchronous session with the bridge.
///
/// Owns the transport and the correlation id counter. Ids start at 1 and
/// wrap around after `u32::MAX`.
#[derive(Debug)]
pub struct Session<T> {
    port: T,
    last_id: u32,
    timeout: Duration,
}

impl<T: Transport> Session<T> {
    /// Start a session over `port` with the given reply timeout.
    ///
    /// # Errors
    ///
    /// An error will be returned if the read timeout cannot be applied to the
    /// transport.
    pub fn new(mut port: T, timeout: Duration) -> Result<Self, Error> {
        port.set_read_timeout(timeout)?;
        Ok(Self {
            port,
            last_id: 0,
            timeout,
        })
    }

    /// Time allowed for each reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Id of the most recently sent call (0 before the first call).
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    /// Discard anything waiting in the transport buffers.
    pub fn clear_input(&mut self) -> Result<(), Error> {
        self.port.clear_input()?;
        Ok(())
    }

    /// Shared access to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.port
    }

    /// Exclusive access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.port
    }

    /// Give the transport back.
    pub fn into_transport(self) -> T {
        self.port
    }

    /// Send one call and wait for its reply.
    ///
    /// Returns the id the call was sent with and the parsed (but not yet
    /// validated) response.
    pub fn exchange(&mut self, method: Method, params: Params) -> Result<(u32, Response), Error> {
        self.last_id = self.last_id.wrapping_add(1);
        let call = MethodCall {
            method,
            params,
            id: self.last_id,
        };
        let request = call.to_bytes();
        log::trace!("sent: {}", String::from_utf8_lossy(&request));
        self.port.write_all(&request)?;
        self.port.flush()?;

        let frame = framing::read_frame(&mut self.port, method.frame_capacity(), self.timeout)
            .inspect_err(|e| log::warn!("no reply to {} (id {}): {e}", method.name(), call.id))?;
        log::trace!("received: {}", String::from_utf8_lossy(&frame));
        let response = Response::parse(&frame)
            .inspect_err(|e| log::warn!("invalid reply to {}: {e}", method.name()))?;
        Ok((call.id, response))
    }

    /// Call a method whose result is a number.
    pub fn call_number(&mut self, method: Method, params: Params) -> Result<u32, Error> {
        let (id, response) = self.exchange(method, params)?;
        response
            .into_number(id)
            .inspect_err(|e| log::warn!("{} rejected: {e}", method.name()))
    }

    /// Call a method whose result is the acknowledgement [`ACK`].
    pub fn call_ack(&mut self, method: Method, params: Params) -> Result<(), Error> {
        let (id, response) = self.exchange(method, params)?;
        response
            .into_ack(id, ACK)
            .inspect_err(|e| log::warn!("{} rejected: {e}", method.name()))
    }

    /// Call a method whose result is an array, keeping at most `limit` values.
    pub fn call_array(
        &mut self,
        method: Method,
        params: Params,
        limit: usize,
    ) -> Result<Vec<u32>, Error> {
        let (id, response) = self.exchange(method, params)?;
        response
            .into_array(id, limit)
            .inspect_err(|e| log::warn!("{} rejected: {e}", method.name()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::FramingError;
    use crate::transport::mock::Scripted;

    fn session(replies: &[u8]) -> Session<Scripted> {
        Session::new(Scripted::new(replies), DEFAULT_TIMEOUT).unwrap()
    }

    fn sent(session: &Session<Scripted>) -> String {
        String::from_utf8(session.transport().written.clone()).unwrap()
    }

    #[test]
    fn serialises_calls_without_empty_params() {
        let reset = MethodCall {
            method: Method::Reset,
            params: Params::none(),
            id: 1,
        };
        assert_eq!(reset.to_bytes(), br#"{"method":"reset","id":1}"#);

        let masked = MethodCall {
            method: Method::WriteMasked,
            params: Params::masked(0x2000, 0xF0, 0x30),
            id: 9,
        };
        assert_eq!(
            masked.to_bytes(),
            br#"{"method":"wr_mask","params":{"address":8192,"mask":240,"data":48},"id":9}"#
        );
    }

    #[test]
    fn method_names_match_serialised_names() {
        for method in [
            Method::Reset,
            Method::Read,
            Method::Write,
            Method::SetBits,
            Method::ClearBits,
            Method::WriteMasked,
            Method::ReadFifo,
        ] {
            assert_eq!(
                serde_json::to_value(method).unwrap(),
                Value::String(method.name().into())
            );
        }
    }

    #[test]
    fn ids_increase_per_call() {
        let mut s = session(br#"{"id":1,"result":"done"}{"id":2,"result":7}"#);
        s.call_ack(Method::Reset, Params::none()).unwrap();
        assert_eq!(s.call_number(Method::Read, Params::address(3)).unwrap(), 7);
        assert_eq!(s.last_id(), 2);
        assert_eq!(
            sent(&s),
            r#"{"method":"reset","id":1}{"method":"rd","params":{"address":3},"id":2}"#
        );
    }

    #[test]
    fn stale_reply_is_rejected() {
        let mut s = session(br#"{"id":41,"result":5}"#);
        let err = s.call_number(Method::Read, Params::address(3)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::IdMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn missing_or_textual_id_is_rejected() {
        let mut s = session(br#"{"result":5}{"id":"2","result":5}"#);
        assert!(matches!(
            s.call_number(Method::Read, Params::address(3)),
            Err(Error::Protocol(ProtocolError::MissingId))
        ));
        assert!(matches!(
            s.call_number(Method::Read, Params::address(3)),
            Err(Error::Protocol(ProtocolError::MissingId))
        ));
    }

    #[test]
    fn remote_error_carries_the_diagnostic() {
        let mut s = session(br#"{"id":1,"error":"invalid address"}{"id":2,"error":{"code":3}}"#);
        match s.call_number(Method::Read, Params::address(0xFFFF)) {
            Err(Error::Remote(message)) => assert_eq!(message, "invalid address"),
            other => panic!("unexpected {other:?}"),
        }
        match s.call_ack(Method::Write, Params::address_data(1, 2)) {
            Err(Error::Remote(message)) => assert_eq!(message, r#"{"code":3}"#),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn acknowledgement_must_match_exactly() {
        let mut s = session(br#"{"id":1,"result":"Done"}{"id":2,"result":1}"#);
        assert!(matches!(
            s.call_ack(Method::Write, Params::address_data(1, 2)),
            Err(Error::Protocol(ProtocolError::UnexpectedAck { .. }))
        ));
        assert!(matches!(
            s.call_ack(Method::Write, Params::address_data(1, 2)),
            Err(Error::Protocol(ProtocolError::MissingResult { .. }))
        ));
    }

    #[test]
    fn malformed_reply_is_a_protocol_error() {
        let mut s = session(br#"{"id":1,"result":}"#);
        assert!(matches!(
            s.call_number(Method::Read, Params::address(3)),
            Err(Error::Protocol(ProtocolError::Malformed(_)))
        ));
    }

    #[test]
    fn no_reply_is_a_framing_timeout() {
        let mut s = session(b"");
        assert!(matches!(
            s.call_ack(Method::Reset, Params::none()),
            Err(Error::Framing(FramingError::Timeout { .. }))
        ));
    }

    #[test]
    fn array_is_capped_and_coerced() {
        let mut s = session(br#"{"id":1,"result":[1,"x",3.9,4294967295,5,6]}"#);
        let values = s
            .call_array(Method::ReadFifo, Params::readcount(4), 4)
            .unwrap();
        assert_eq!(values, [1, 0, 3, u32::MAX]);
    }

    #[test]
    fn out_of_range_numbers_saturate() {
        let n = |text: &str| number_to_u32(&serde_json::from_str(text).unwrap());
        assert_eq!(n("4294967296"), u32::MAX);
        assert_eq!(n("1e12"), u32::MAX);
        assert_eq!(n("-1"), 0);
        assert_eq!(n("-2.5"), 0);
        assert_eq!(n("7.9"), 7);
    }

    #[test]
    fn short_array_is_returned_as_is() {
        let mut s = session(br#"{"id":1,"result":[10,20]}"#);
        let values = s
            .call_array(Method::ReadFifo, Params::readcount(8), 8)
            .unwrap();
        assert_eq!(values, [10, 20]);
    }

    #[test]
    fn session_applies_timeout_to_transport() {
        let s = session(b"");
        assert_eq!(s.transport().timeout, Some(DEFAULT_TIMEOUT));
    }
}
