//! Memory-augmented decoder core.
//!
//! NTM/DNC-style external memory: a controller drives read and write heads that
//! address a `[batch, addresses, content]` memory bank through content
//! addressing, interpolation gating, circular shifting and sharpening.

pub mod error;
pub mod tensor;
pub mod config;
pub mod addressing;
pub mod memory;
pub mod layout;
pub mod linear;
pub mod state;
pub mod interface;
pub mod controller;
pub mod driver;
pub mod checkpoint;

pub use error::{MemoryError, Result};
pub use addressing::{Attention, ShiftKernel};
pub use config::{InterfaceConfig, ModelConfig};
pub use interface::{MemoryInterface, StepOutput};
pub use memory::Memory;
pub use state::{HeadState, InterfaceState};
