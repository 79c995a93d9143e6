use ad5940_serial::registers::CALDATLOCK;
use ad5940_serial::{Ad5940, Transport};
use anyhow::{Context, bail};

use crate::cli;

#[derive(Debug, clap::Subcommand)]
pub(crate) enum RegisterCommand {
    /// Read a register.
    Read {
        /// Register address in hexadecimal.
        #[arg(value_parser = cli::address)]
        address: u16,
    },
    /// Write a register.
    Write {
        /// Register address in hexadecimal.
        #[arg(value_parser = cli::address)]
        address: u16,
        /// New value in hexadecimal.
        #[arg(value_parser = cli::word)]
        value: u32,
    },
    /// Set bits in a register.
    SetBits {
        /// Register address in hexadecimal.
        #[arg(value_parser = cli::address)]
        address: u16,
        /// Bits to set, in hexadecimal.
        #[arg(value_parser = cli::word)]
        mask: u32,
    },
    /// Clear bits in a register.
    ClearBits {
        /// Register address in hexadecimal.
        #[arg(value_parser = cli::address)]
        address: u16,
        /// Bits to clear, in hexadecimal.
        #[arg(value_parser = cli::word)]
        mask: u32,
    },
    /// Replace the masked bits of a register.
    WriteMask {
        /// Register address in hexadecimal.
        #[arg(value_parser = cli::address)]
        address: u16,
        /// Bits to replace, in hexadecimal.
        #[arg(value_parser = cli::word)]
        mask: u32,
        /// New values for the masked bits, in hexadecimal.
        #[arg(value_parser = cli::word)]
        value: u32,
    },
    /// Read words from the data FIFO.
    ReadFifo {
        /// Maximum number of words to read.
        count: u32,
    },
    /// Exercise the register protocol on the CALDATLOCK register.
    ///
    /// Writes and reads back a set of bit patterns, then checks that set-bits
    /// and clear-bits touch only the bits named.
    SelfTest,
}

pub(crate) fn action<T: Transport>(
    afe: &mut Ad5940<T>,
    command: RegisterCommand,
) -> anyhow::Result<()> {
    match command {
        RegisterCommand::Read { address } => {
            let value = afe.read_register(address)?;
            println!("{address:#06X}: {value:#010X}");
        }
        RegisterCommand::Write { address, value } => afe.write_register(address, value)?,
        RegisterCommand::SetBits { address, mask } => afe.set_bits(address, mask)?,
        RegisterCommand::ClearBits { address, mask } => afe.clear_bits(address, mask)?,
        RegisterCommand::WriteMask {
            address,
            mask,
            value,
        } => afe.write_masked(address, mask, value)?,
        RegisterCommand::ReadFifo { count } => {
            for word in afe.read_fifo(count)? {
                println!("{word:#010X}");
            }
        }
        RegisterCommand::SelfTest => self_test(afe)?,
    }
    Ok(())
}

/// Bit operation applied after the initial write in a bit function check.
#[derive(Debug, Clone, Copy)]
enum BitOp {
    Set(u32),
    Clear(u32),
}

/// (initial value, operation, expected result)
const BIT_CHECKS: [(u32, BitOp, u32); 6] = [
    (0x0000_0000, BitOp::Set(0x0000_0001), 0x0000_0001),
    (0x0000_0000, BitOp::Set(0x8000_0000), 0x8000_0000),
    (0xFFFF_FFFF, BitOp::Clear(0x0000_0001), 0xFFFF_FFFE),
    (0xFFFF_FFFF, BitOp::Clear(0x8000_0000), 0x7FFF_FFFF),
    (0x0000_0001, BitOp::Set(0x0000_0001), 0x0000_0001),
    (0xFFFF_FFFE, BitOp::Clear(0x0000_0001), 0xFFFF_FFFE),
];

fn patterns() -> impl Iterator<Item = u32> {
    [0x0000_0000u32, 0xFFFF_FFFF, 0xAAAA_AAAA, 0x5555_5555]
        .into_iter()
        .chain((0..32).map(|bit| 1u32 << bit))
}

fn self_test<T: Transport>(afe: &mut Ad5940<T>) -> anyhow::Result<()> {
    let mut failures = 0;

    for pattern in patterns() {
        afe.write_register(CALDATLOCK, pattern)
            .with_context(|| format!("writing {pattern:#010X}"))?;
        let read = afe.read_register(CALDATLOCK)?;
        if read == pattern {
            log::debug!("wrote {pattern:#010X}, read {read:#010X}");
        } else {
            log::error!("wrote {pattern:#010X}, read {read:#010X}");
            failures += 1;
        }
    }

    for (initial, op, expected) in BIT_CHECKS {
        afe.write_register(CALDATLOCK, initial)?;
        match op {
            BitOp::Set(mask) => afe.set_bits(CALDATLOCK, mask)?,
            BitOp::Clear(mask) => afe.clear_bits(CALDATLOCK, mask)?,
        }
        let read = afe.read_register(CALDATLOCK)?;
        if read != expected {
            log::error!("{initial:#010X} then {op:X?}: expected {expected:#010X}, read {read:#010X}");
            failures += 1;
        }
    }

    let total = patterns().count() + BIT_CHECKS.len();
    if failures > 0 {
        bail!("{failures} of {total} register checks failed");
    }
    println!("all {total} register checks passed");
    Ok(())
}
