//! The render engine: scratch allocation, sequence compilation, garbage
//! collection, and the `Runtime` that ties them together (§4.5–§4.8).

pub mod garbage;
pub mod runtime;
pub mod scratch;
pub mod sequence;

pub use runtime::{Instruction, Runtime};
pub use sequence::{RenderSequence, RootGainState};
