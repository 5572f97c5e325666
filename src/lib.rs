//! The realtime core of an audio signal-processing engine driven by
//! declarative graph descriptions: an instruction-batch interpreter over a
//! node/edge graph, compiled into a lock-free render sequence the audio
//! thread executes with no allocation, blocking, or locking (§5).

pub mod catalog;
pub mod engine;
pub mod error;
pub mod node;
pub mod pool;
pub mod registry;
pub mod resources;
pub mod ring_buffer;
pub mod spsc;
pub mod value;

pub use engine::{Instruction, RenderSequence, Runtime};
pub use error::{GraphError, PropertyError, ReturnCode};
pub use node::{BlockContext, Event, GraphNode, NodeFactory, NodeId};
pub use registry::Registry;
pub use resources::{SampleBuffer, SharedResourceMap};
pub use value::Value;
