//! Register access and bring-up against the simulated bridge.
mod common;

use std::time::Duration;

use ad5940_serial::registers::{AFECON, CALDATLOCK, CHIPID, INTCSEL1, PMBW};
use ad5940_serial::{Ad5940, Error, FramingError, ProtocolError};
use common::{CHIPID_REV2, Fault, SimulatedBridge, init_logging};
use serde_json::json;

fn driver(bridge: SimulatedBridge) -> Ad5940<SimulatedBridge> {
    init_logging();
    Ad5940::new(bridge).unwrap()
}

/// Writes a register and reads the same value back.
#[test]
fn write_then_read() -> Result<(), Error> {
    let mut afe = driver(SimulatedBridge::new());
    afe.write_register(CALDATLOCK, 0x03)?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0x03);

    let requests = &afe.session().transport().requests;
    assert_eq!(
        requests[0],
        json!({"method": "wr", "params": {"address": 0x2230, "data": 3}, "id": 1})
    );
    assert_eq!(
        requests[1],
        json!({"method": "rd", "params": {"address": 0x2230}, "id": 2})
    );
    Ok(())
}

/// A full 32-bit word survives a write and read back at a low address.
#[test]
fn write_then_read_full_word() -> Result<(), Error> {
    let mut afe = driver(SimulatedBridge::new());
    afe.write_register(0x0003, 0x1234_5678)?;
    assert_eq!(afe.read_register(0x0003)?, 0x1234_5678);

    let requests = &afe.session().transport().requests;
    assert_eq!(
        requests[0],
        json!({"method": "wr", "params": {"address": 3, "data": 0x1234_5678}, "id": 1})
    );
    Ok(())
}

/// Setting bit 0 of a cleared register and clearing bit 31 of a full one.
#[test]
fn single_bit_edges() -> Result<(), Error> {
    let mut afe = driver(SimulatedBridge::new());
    afe.write_register(CALDATLOCK, 0)?;
    afe.set_bits(CALDATLOCK, 0x1)?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0x0000_0001);

    afe.write_register(CALDATLOCK, 0xFFFF_FFFF)?;
    afe.clear_bits(CALDATLOCK, 0x8000_0000)?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0x7FFF_FFFF);

    let requests = &afe.session().transport().requests;
    assert_eq!(requests[1]["method"], "set_bits");
    assert_eq!(requests[1]["params"]["data"], 1);
    assert_eq!(requests[4]["method"], "clr_bits");
    assert_eq!(requests[4]["params"]["data"], 0x8000_0000u32);
    Ok(())
}

/// Session timeout is applied to the transport up front.
#[test]
fn timeout_is_applied() -> Result<(), Error> {
    init_logging();
    let afe = Ad5940::with_timeout(SimulatedBridge::new(), Duration::from_millis(250))?;
    assert_eq!(
        afe.session().transport().read_timeout,
        Some(Duration::from_millis(250))
    );
    Ok(())
}

/// Set, clear and masked writes change only the named bits.
#[test]
fn bit_operations() -> Result<(), Error> {
    let mut afe = driver(SimulatedBridge::new());
    afe.write_register(CALDATLOCK, 0x0F0)?;
    afe.set_bits(CALDATLOCK, 0x003)?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0x0F3);
    afe.clear_bits(CALDATLOCK, 0x030)?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0x0C3);
    afe.write_masked(CALDATLOCK, 0x0FF, 0x15A)?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0x05A);
    Ok(())
}

/// FIFO reads return what the bridge has, up to the requested count.
#[test]
fn fifo_read() -> Result<(), Error> {
    let mut bridge = SimulatedBridge::new();
    bridge.fifo.extend([10, 20, 30, 40]);
    let mut afe = driver(bridge);
    assert_eq!(afe.read_fifo(3)?, vec![10, 20, 30]);
    assert_eq!(afe.read_fifo(3)?, vec![40]);
    assert_eq!(afe.read_fifo(3)?, Vec::<u32>::new());
    Ok(())
}

/// An overlong FIFO reply is truncated and non-numeric entries read as zero.
#[test]
fn fifo_reply_is_sanitised() -> Result<(), Error> {
    let mut bridge = SimulatedBridge::new();
    bridge.push_fault(Fault::Result(json!([1, "x", 3, 4, 5])));
    let mut afe = driver(bridge);
    assert_eq!(afe.read_fifo(3)?, vec![1, 0, 3]);
    Ok(())
}

/// Bytes ahead of the reply are skipped.
#[test]
fn noise_before_reply_is_ignored() -> Result<(), Error> {
    let mut bridge = SimulatedBridge::new();
    bridge.set_register(PMBW, 0x1234);
    bridge.push_fault(Fault::Noise(b"\0\xFF}garbage".to_vec()));
    let mut afe = driver(bridge);
    assert_eq!(afe.read_register(PMBW)?, 0x1234);
    Ok(())
}

/// A reply to another call is rejected, and the next call is unaffected.
#[test]
fn stale_reply_is_rejected() -> Result<(), Error> {
    let mut bridge = SimulatedBridge::new();
    bridge.push_fault(Fault::StaleId);
    let mut afe = driver(bridge);
    match afe.read_register(CHIPID) {
        Err(Error::Protocol(ProtocolError::IdMismatch { expected, received })) => {
            assert_eq!(expected, 1);
            assert_eq!(received, "0");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(afe.read_register(CHIPID)?, CHIPID_REV2);
    Ok(())
}

/// In-band errors are reported with their text.
#[test]
fn remote_error() {
    let mut bridge = SimulatedBridge::new();
    bridge
        .push_fault(Fault::Error(json!("bad address")))
        .push_fault(Fault::Error(json!({"code": 3})));
    let mut afe = driver(bridge);
    assert!(matches!(
        afe.write_register(0xFFFF, 1),
        Err(Error::Remote(ref text)) if text == "bad address"
    ));
    assert!(matches!(
        afe.read_register(0xFFFF),
        Err(Error::Remote(ref text)) if text == r#"{"code":3}"#
    ));
}

/// A write acknowledged with anything but "done" fails.
#[test]
fn unexpected_acknowledgement() {
    let mut bridge = SimulatedBridge::new();
    bridge.push_fault(Fault::Result(json!("ok")));
    let mut afe = driver(bridge);
    assert!(matches!(
        afe.write_register(CALDATLOCK, 1),
        Err(Error::Protocol(ProtocolError::UnexpectedAck { .. }))
    ));
}

/// No reply at all ends in a framing timeout.
#[test]
fn silent_bridge_times_out() {
    let mut bridge = SimulatedBridge::new();
    bridge.push_fault(Fault::Silence);
    let mut afe = driver(bridge);
    assert!(matches!(
        afe.read_register(CHIPID),
        Err(Error::Framing(FramingError::Timeout { captured: 0, .. }))
    ));
}

/// Anything the bridge prints while restarting is discarded after a reset.
#[test]
fn reset_discards_boot_output() -> Result<(), Error> {
    let mut bridge = SimulatedBridge::new();
    bridge.reset_banner = b"bridge ready {fw 1.2}\r\n".to_vec();
    let mut afe = driver(bridge);
    afe.write_register(CALDATLOCK, 7)?;
    afe.reset()?;
    assert_eq!(afe.read_register(CALDATLOCK)?, 0);
    assert_eq!(afe.session().transport().methods(), ["wr", "reset", "rd"]);
    Ok(())
}

/// Bring-up identifies the chip and leaves it ready for measurements.
#[test]
fn initialize() -> Result<(), Error> {
    let mut afe = driver(SimulatedBridge::new());
    let info = afe.initialize()?;
    assert_eq!(info.revision, 2);

    let bridge = afe.session().transport();
    assert_eq!(bridge.methods()[0], "reset");
    assert_eq!(bridge.register(INTCSEL1), u32::MAX);
    // HP reference enabled (disable bit clear), TIA, DAC, and buffers on.
    assert_eq!(bridge.register(AFECON) & 0x0011_0E40, 0x0011_0E40);
    assert_eq!(bridge.register(AFECON) & (1 << 5), 0);
    Ok(())
}

/// A different chip is refused.
#[test]
fn unknown_device() {
    let mut bridge = SimulatedBridge::new();
    bridge.set_register(CHIPID, 0x1234);
    let mut afe = driver(bridge);
    assert!(matches!(
        afe.identify(),
        Err(Error::UnknownDevice { chipid: 0x1234, .. })
    ));
}
