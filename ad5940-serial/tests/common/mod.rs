//! Simulated serial bridge for integration tests.
//!
//! Implements the JSON method-call protocol against an in-memory register
//! file. Starting a conversion with the DFT block enabled loads the next
//! queued result into DFTREAL/DFTIMAG and raises the DFT-ready flag.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

use ad5940_serial::Transport;
use ad5940_serial::registers::{
    ADIID, ADIID_VALUE, AFECON, CHIPID, DFTIMAG, DFTREAL, INTCCLR, INTCFLAG0, INTCFLAG1,
};
use serde_json::{Value, json};

/// CHIPID of a revision 2 part.
pub const CHIPID_REV2: u32 = 0x5502;

const AFECON_DFT: u32 = 1 << 15;
const DFT_READY: u32 = 1 << 1;

/// Deviation from a well-behaved reply, applied to the next request.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Send these bytes before the reply.
    Noise(Vec<u8>),
    /// Reply with the previous request's id.
    StaleId,
    /// Reply with this `error` member instead of a result.
    Error(Value),
    /// Reply with this `result` instead of the real one.
    Result(Value),
    /// Do not reply at all.
    Silence,
}

/// In-memory stand-in for the bridge firmware and the AFE behind it.
#[derive(Debug, Default)]
pub struct SimulatedBridge {
    registers: HashMap<u16, u32>,
    pending: Vec<u8>,
    outgoing: VecDeque<u8>,
    /// Every request received, in order.
    pub requests: Vec<Value>,
    /// Results for successive DFT conversions. `None` leaves the result
    /// registers untouched and the flag clear.
    pub dft_results: VecDeque<Option<(u32, u32)>>,
    /// Words returned by `rd_fifo`.
    pub fifo: VecDeque<u32>,
    /// Faults applied to successive requests.
    pub faults: VecDeque<Fault>,
    /// Bytes sent right after acknowledging a reset, like a boot banner.
    pub reset_banner: Vec<u8>,
    /// Last read timeout set by the host.
    pub read_timeout: Option<Duration>,
    /// Registers whose reads are answered with an error.
    pub failing_reads: HashSet<u16>,
}

impl SimulatedBridge {
    pub fn new() -> Self {
        let mut bridge = Self::default();
        bridge.power_on();
        bridge
    }

    /// Queue one DFT result, in raw register form.
    pub fn push_dft(&mut self, real: u32, imag: u32) -> &mut Self {
        self.dft_results.push_back(Some((real, imag)));
        self
    }

    /// Queue a conversion that never produces a result.
    pub fn push_stalled_dft(&mut self) -> &mut Self {
        self.dft_results.push_back(None);
        self
    }

    pub fn push_fault(&mut self, fault: Fault) -> &mut Self {
        self.faults.push_back(fault);
        self
    }

    pub fn register(&self, address: u16) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    pub fn set_register(&mut self, address: u16, value: u32) {
        self.registers.insert(address, value);
    }

    /// Names of the methods called so far.
    pub fn methods(&self) -> Vec<String> {
        self.requests
            .iter()
            .map(|r| r["method"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    fn power_on(&mut self) {
        self.registers.clear();
        self.registers.insert(ADIID, ADIID_VALUE);
        self.registers.insert(CHIPID, CHIPID_REV2);
    }

    fn store(&mut self, address: u16, value: u32) {
        let old = self.register(address);
        match address {
            INTCCLR => {
                for flag in [INTCFLAG0, INTCFLAG1] {
                    let flags = self.register(flag);
                    self.registers.insert(flag, flags & !value);
                }
            }
            AFECON => {
                self.registers.insert(address, value);
                if old & AFECON_DFT == 0 && value & AFECON_DFT != 0 {
                    self.convert();
                }
            }
            _ => {
                self.registers.insert(address, value);
            }
        }
    }

    fn convert(&mut self) {
        if let Some(Some((real, imag))) = self.dft_results.pop_front() {
            self.registers.insert(DFTREAL, real);
            self.registers.insert(DFTIMAG, imag);
            for flag in [INTCFLAG0, INTCFLAG1] {
                let flags = self.register(flag);
                self.registers.insert(flag, flags | DFT_READY);
            }
        }
    }

    fn handle(&mut self, request: Value) {
        self.requests.push(request.clone());
        let id = request["id"].as_u64().unwrap_or(0);
        let params = &request["params"];
        let param = |name: &str| params[name].as_u64().unwrap_or(0);
        let address = param("address") as u16;

        let mut reset = false;
        let result = match request["method"].as_str().unwrap_or_default() {
            "reset" => {
                self.power_on();
                reset = true;
                json!("done")
            }
            "rd" if self.failing_reads.contains(&address) => {
                self.reply(json!({"id": id, "error": format!("read of {address:#06X} failed")}));
                return;
            }
            "rd" => json!(self.register(address)),
            "wr" => {
                self.store(address, param("data") as u32);
                json!("done")
            }
            "set_bits" => {
                self.store(address, self.register(address) | param("data") as u32);
                json!("done")
            }
            "clr_bits" => {
                self.store(address, self.register(address) & !(param("data") as u32));
                json!("done")
            }
            "wr_mask" => {
                let mask = param("mask") as u32;
                let data = param("data") as u32;
                self.store(address, (self.register(address) & !mask) | (data & mask));
                json!("done")
            }
            "rd_fifo" => {
                let count = (param("readcount") as usize).min(self.fifo.len());
                json!(self.fifo.drain(..count).collect::<Vec<_>>())
            }
            other => {
                self.reply(json!({"id": id, "error": format!("unknown method {other}")}));
                return;
            }
        };

        let reply = match self.faults.pop_front() {
            None => json!({"id": id, "result": result}),
            Some(Fault::Noise(noise)) => {
                self.outgoing.extend(noise);
                json!({"id": id, "result": result})
            }
            Some(Fault::StaleId) => json!({"id": id.saturating_sub(1), "result": result}),
            Some(Fault::Error(error)) => json!({"id": id, "error": error}),
            Some(Fault::Result(result)) => json!({"id": id, "result": result}),
            Some(Fault::Silence) => return,
        };
        self.reply(reply);
        if reset {
            let banner = self.reset_banner.clone();
            self.outgoing.extend(banner);
        }
    }

    fn reply(&mut self, reply: Value) {
        self.outgoing.extend(reply.to_string().into_bytes());
    }
}

impl Read for SimulatedBridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.outgoing.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no reply")),
        }
    }
}

impl Write for SimulatedBridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let request: Value = serde_json::from_slice(&pending)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.handle(request);
        Ok(())
    }
}

impl Transport for SimulatedBridge {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = Some(timeout);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.outgoing.clear();
        Ok(())
    }
}

/// Capture library logs in test output.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Encode a signed DFT component as the chip's 20-bit register value.
pub fn raw(value: i32) -> u32 {
    (value as u32) & 0xF_FFFF
}
