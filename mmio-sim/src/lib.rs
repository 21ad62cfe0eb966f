//! Memory and MMIO model for a speculative pipeline simulator.
//!
//! Requests from the pipeline may be speculative. Memory writes are held in
//! a store buffer (and forwarded to younger loads) until the issuing
//! instruction retires or is squashed; device accesses from the speculative
//! data path are deferred until the pipeline reissues them at retirement.

pub mod bus;
pub mod config;
pub mod console;
pub mod dram;
pub mod error;
pub mod memhex;
pub mod req;
pub mod store_buffer;
pub mod system;
pub mod tohost;
pub mod trace;
pub mod uart;

pub use bus::{Bus, Window};
pub use config::SimConfig;
pub use error::SimError;
pub use req::{Client, MemOp, MemRequest, MemResponse, RawRequest, RspStatus};
pub use system::MemSystem;
pub use tohost::HostStatus;
pub use uart::{CharSource, LineInput, NoInput, Uart16550};
