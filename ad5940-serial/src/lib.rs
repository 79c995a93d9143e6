#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod afe;
pub mod dft;
mod driver;
mod error;
pub mod framing;
mod impedance;
pub mod registers;
pub mod rpc;
pub mod sweep;
pub mod transport;

pub use driver::{Ad5940, ChipInfo, RtiaCalConfig, RtiaCalibration};
pub use error::{Error, FramingError, ProtocolError};
pub use impedance::{ADC_PP_MAX_MV, AppConfig, ImpedanceApp};
pub use num_complex::Complex32;
pub use transport::Transport;
