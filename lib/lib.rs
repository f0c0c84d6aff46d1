//! Kestrel: the engine underneath a whole-program analysis of object-oriented
//! programs.
//!
//! Kestrel keeps facts about a program in a store of *domains* (dense,
//! append-only numberings of program entities) and *relations* (n-ary tuple
//! sets over those domains). Analyses are *tasks* that declare which
//! artifacts they consume and produce; the [`project::Project`] runs them on
//! demand, memoizing what has already been computed in the session.
//!
//! On top of this sit:
//!
//! * [`alias`]: call-string contexts, the context computation and the
//! context-sensitive call graph.
//! * [`refine`]: the loop that alternates a client analysis with a
//! refinement step until nothing more is refined.
//! * [`trace`]: the binary event trace emitted by an instrumented program and
//! the reader feeding it back into the store.
//!
//! ```no_run
//! use kestrel::options::OptionsBuilder;
//! use kestrel::program::Program;
//! use kestrel::project::Project;
//! use kestrel::RC;
//!
//! # fn main() -> Result<(), kestrel::Error> {
//! let program = Program::from_file("program.json")?;
//! let options = OptionsBuilder::new().work_dir("out").max_iters(8).build();
//! let mut project = Project::with_builtin_tasks(options, RC::new(program))?;
//! project.run_task("ctxts")?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod alias;
pub mod doms;
pub mod dynamic;
pub mod graph;
pub mod options;
pub mod program;
pub mod project;
pub mod refine;
pub mod rels;
pub mod store;
#[cfg(test)]
mod tests;
pub mod trace;

#[cfg(not(feature = "thread_safe"))]
use std::rc::Rc;
#[cfg(feature = "thread_safe")]
use std::sync::Arc;

#[cfg(not(feature = "thread_safe"))]
pub type RC<T> = Rc<T>;
#[cfg(feature = "thread_safe")]
pub type RC<T> = Arc<T>;

use thiserror::Error;

pub use trace::ProtocolError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} is not ready")]
    NotReady(String),
    #[error("Schema mismatch in relation {relation}: {reason}")]
    SchemaMismatch { relation: String, reason: String },
    #[error("Cyclic dependency between tasks: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
    #[error("Solver failed (exit code {code:?}): {stderr}")]
    SolverFailure { code: Option<i32>, stderr: String },
    #[error("Trace protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("No task named {0}")]
    TaskNotFound(String),
    #[error("Task {0} is already running")]
    TaskInProgress(String),
    #[error("A task named {0} is already registered")]
    DuplicateTask(String),
    #[error("Artifact {artifact} is produced by both {first} and {second}")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },
    #[error("Domain {domain} has no element {index}")]
    DomainIndexOutOfBounds { domain: String, index: usize },
    #[error("{file}:{line}: {message}")]
    DatalogParse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("Invalid value for option {key}: {message}")]
    InvalidOption { key: String, message: String },
    #[error("Invalid program: {0}")]
    InvalidProgram(String),
    #[error("The vertex id {0} does not exist in the graph")]
    GraphVertexNotFound(usize),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ParseIntError: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("{0}")]
    Custom(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Custom(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}
