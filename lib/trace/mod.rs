//! The binary event trace.
//!
//! An instrumented program reports what it does as a stream of frames. Each
//! frame is a big-endian 32-bit opcode followed by a fixed number of
//! big-endian 32-bit operands that depends only on the opcode; there is no
//! length prefix and no padding. The stream is written in blocks of a
//! configured size and a frame may straddle two blocks.
//!
//! [`Tracer`] is the producing side, [`TraceReader`] and [`EventHandler`] the
//! consuming side.

use thiserror::Error;

mod buffer;
mod event;
mod reader;
mod writer;

pub use self::event::{Event, EventKind, InstrScheme};
pub use self::reader::{dispatch, print_trace, process, EventHandler, TraceReader};
pub use self::writer::{ObjectId, ObjectIds, TraceWriter, Tracer};

/// A trace that does not follow the frame layout.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ProtocolError {
    #[error("unknown opcode {opcode} at byte {offset}")]
    UnknownOpcode { opcode: i32, offset: u64 },
    #[error("trace ends inside the {} frame at byte {offset}", .kind.map(|k| k.name()).unwrap_or("opcode of a"))]
    Truncated {
        kind: Option<EventKind>,
        offset: u64,
    },
    #[error("every object id is taken")]
    ObjectIdsExhausted,
}
