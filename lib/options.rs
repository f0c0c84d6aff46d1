//! Options controlling a kestrel `Project`.
//!
//! Options can be assembled with `OptionsBuilder`, deserialized from JSON, or
//! read from plain `key=value` properties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Error;

/// The smallest trace block that can still hold one opcode and one operand.
pub const MIN_TRACE_BLOCK_SIZE: usize = 8;

/// How the contexts of a method are abstracted.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CtxtKind {
    /// Context insensitive: only the epsilon context.
    #[serde(rename = "ci")]
    Insensitive,
    /// k-call-site sensitive.
    #[serde(rename = "cs")]
    CallSite,
    /// k-object sensitive.
    #[serde(rename = "co")]
    Object,
    /// Contexts are copied from the callers.
    #[serde(rename = "cc")]
    Copy,
}

impl FromStr for CtxtKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<CtxtKind, Error> {
        match s {
            "ci" => Ok(CtxtKind::Insensitive),
            "cs" => Ok(CtxtKind::CallSite),
            "co" => Ok(CtxtKind::Object),
            "cc" => Ok(CtxtKind::Copy),
            _ => Err(Error::InvalidOption {
                key: "ctxt.kind".to_string(),
                message: format!("unknown context kind {}", s),
            }),
        }
    }
}

impl fmt::Display for CtxtKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CtxtKind::Insensitive => write!(f, "ci"),
            CtxtKind::CallSite => write!(f, "cs"),
            CtxtKind::Object => write!(f, "co"),
            CtxtKind::Copy => write!(f, "cc"),
        }
    }
}

/// Various options that can be passed to a project.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Options {
    max_iters: usize,
    inst_ctxt_kind: CtxtKind,
    stat_ctxt_kind: CtxtKind,
    kobj_k: usize,
    kcfa_k: usize,
    trace_block_size: usize,
    trace_file: Option<PathBuf>,
    solver_program: String,
    solver_args: Vec<String>,
    solver_max_heap: String,
    verbose: u32,
    work_dir: PathBuf,
    out_dir: PathBuf,
    dlog_path: Vec<PathBuf>,
    method_remap_file: Option<PathBuf>,
    escape_flow_insensitive: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            max_iters: 0,
            inst_ctxt_kind: CtxtKind::Insensitive,
            stat_ctxt_kind: CtxtKind::Insensitive,
            kobj_k: 1,
            kcfa_k: 1,
            trace_block_size: 4096,
            trace_file: None,
            solver_program: "bddbddb".to_string(),
            solver_args: Vec::new(),
            solver_max_heap: "1024m".to_string(),
            verbose: 1,
            work_dir: PathBuf::from("kestrel_output/bddbddb"),
            out_dir: PathBuf::from("kestrel_output"),
            dlog_path: Vec::new(),
            method_remap_file: None,
            escape_flow_insensitive: false,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, Error>
where
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| Error::InvalidOption {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.trim() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(Error::InvalidOption {
            key: key.to_string(),
            message: format!("expected a boolean, found {}", other),
        }),
    }
}

fn split_list(value: &str, separator: char) -> impl Iterator<Item = &str> {
    value
        .split(separator)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

impl Options {
    /// Create a new set of Options with the default settings.
    pub fn new() -> Options {
        Options::default()
    }

    /// Reads options from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Options, Error> {
        let text = fs::read_to_string(path)?;
        let options: Options = serde_json::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from `key=value` lines. Blank lines and lines starting
    /// with `#` are ignored.
    pub fn from_properties(text: &str) -> Result<Options, Error> {
        let mut options = Options::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| Error::InvalidOption {
                key: line.to_string(),
                message: "expected key=value".to_string(),
            })?;
            options.set(key.trim(), value.trim())?;
        }
        options.validate()?;
        Ok(options)
    }

    /// Sets a single option by its property key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "max.iters" => self.max_iters = parse_value(key, value)?,
            "ctxt.kind" => {
                let kind: CtxtKind = value.parse()?;
                self.inst_ctxt_kind = kind;
                self.stat_ctxt_kind = kind;
            }
            "inst.ctxt.kind" => self.inst_ctxt_kind = value.parse()?,
            "stat.ctxt.kind" => self.stat_ctxt_kind = value.parse()?,
            "kobj.k" => self.kobj_k = parse_value(key, value)?,
            "kcfa.k" => self.kcfa_k = parse_value(key, value)?,
            "trace.block.size" => self.trace_block_size = parse_value(key, value)?,
            "trace.file" => self.trace_file = Some(PathBuf::from(value)),
            "solver.program" => self.solver_program = value.to_string(),
            "solver.args" => {
                self.solver_args = split_list(value, ' ').map(|s| s.to_string()).collect()
            }
            "solver.max.heap" => self.solver_max_heap = value.to_string(),
            "verbose" => self.verbose = parse_value(key, value)?,
            "work.dir" => self.work_dir = PathBuf::from(value),
            "out.dir" => self.out_dir = PathBuf::from(value),
            "dlog.path" => self.dlog_path = split_list(value, ':').map(PathBuf::from).collect(),
            "method.remap.file" => self.method_remap_file = Some(PathBuf::from(value)),
            "escape.flowins" => self.escape_flow_insensitive = parse_bool(key, value)?,
            _ => {
                return Err(Error::InvalidOption {
                    key: key.to_string(),
                    message: "unknown option".to_string(),
                })
            }
        }
        Ok(())
    }

    /// Checks the values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), Error> {
        if self.trace_block_size < MIN_TRACE_BLOCK_SIZE {
            return Err(Error::InvalidOption {
                key: "trace.block.size".to_string(),
                message: format!(
                    "{} is smaller than {}",
                    self.trace_block_size, MIN_TRACE_BLOCK_SIZE
                ),
            });
        }
        if self.kobj_k == 0 || self.kcfa_k == 0 {
            return Err(Error::InvalidOption {
                key: "kobj.k/kcfa.k".to_string(),
                message: "k must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Maximum number of refinement rounds before giving up.
    pub fn max_iters(&self) -> usize {
        self.max_iters
    }

    pub fn set_max_iters(&mut self, max_iters: usize) {
        self.max_iters = max_iters;
    }

    /// Context kind used for instance methods.
    pub fn inst_ctxt_kind(&self) -> CtxtKind {
        self.inst_ctxt_kind
    }

    /// Context kind used for static methods.
    pub fn stat_ctxt_kind(&self) -> CtxtKind {
        self.stat_ctxt_kind
    }

    pub fn kobj_k(&self) -> usize {
        self.kobj_k
    }

    pub fn kcfa_k(&self) -> usize {
        self.kcfa_k
    }

    pub fn trace_block_size(&self) -> usize {
        self.trace_block_size
    }

    pub fn trace_file(&self) -> Option<&Path> {
        self.trace_file.as_deref()
    }

    pub fn solver_program(&self) -> &str {
        &self.solver_program
    }

    pub fn solver_args(&self) -> &[String] {
        &self.solver_args
    }

    pub fn solver_max_heap(&self) -> &str {
        &self.solver_max_heap
    }

    pub fn verbose(&self) -> u32 {
        self.verbose
    }

    /// Directory holding domain and relation files.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Directory for reports such as XML domain dumps.
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Directories searched for `.datalog` task files.
    pub fn dlog_path(&self) -> &[PathBuf] {
        &self.dlog_path
    }

    pub fn method_remap_file(&self) -> Option<&Path> {
        self.method_remap_file.as_deref()
    }

    /// Whether dynamic escape is computed per allocation site rather than per
    /// object at the time of access.
    pub fn escape_flow_insensitive(&self) -> bool {
        self.escape_flow_insensitive
    }
}

/// Create your options with the builder pattern.
///
/// For more details on the options, see `options::Options`
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn new() -> OptionsBuilder {
        OptionsBuilder {
            options: Options::default(),
        }
    }

    pub fn max_iters(mut self, max_iters: usize) -> OptionsBuilder {
        self.options.max_iters = max_iters;
        self
    }

    /// Sets the context kind of both instance and static methods.
    pub fn ctxt_kind(mut self, kind: CtxtKind) -> OptionsBuilder {
        self.options.inst_ctxt_kind = kind;
        self.options.stat_ctxt_kind = kind;
        self
    }

    pub fn inst_ctxt_kind(mut self, kind: CtxtKind) -> OptionsBuilder {
        self.options.inst_ctxt_kind = kind;
        self
    }

    pub fn stat_ctxt_kind(mut self, kind: CtxtKind) -> OptionsBuilder {
        self.options.stat_ctxt_kind = kind;
        self
    }

    pub fn kobj_k(mut self, k: usize) -> OptionsBuilder {
        self.options.kobj_k = k;
        self
    }

    pub fn kcfa_k(mut self, k: usize) -> OptionsBuilder {
        self.options.kcfa_k = k;
        self
    }

    pub fn trace_block_size(mut self, size: usize) -> OptionsBuilder {
        self.options.trace_block_size = size;
        self
    }

    pub fn trace_file<P: Into<PathBuf>>(mut self, path: P) -> OptionsBuilder {
        self.options.trace_file = Some(path.into());
        self
    }

    pub fn solver<S: Into<String>>(mut self, program: S, args: Vec<String>) -> OptionsBuilder {
        self.options.solver_program = program.into();
        self.options.solver_args = args;
        self
    }

    pub fn solver_max_heap<S: Into<String>>(mut self, heap: S) -> OptionsBuilder {
        self.options.solver_max_heap = heap.into();
        self
    }

    pub fn verbose(mut self, verbose: u32) -> OptionsBuilder {
        self.options.verbose = verbose;
        self
    }

    pub fn work_dir<P: Into<PathBuf>>(mut self, path: P) -> OptionsBuilder {
        self.options.work_dir = path.into();
        self
    }

    pub fn out_dir<P: Into<PathBuf>>(mut self, path: P) -> OptionsBuilder {
        self.options.out_dir = path.into();
        self
    }

    pub fn add_dlog_dir<P: Into<PathBuf>>(mut self, path: P) -> OptionsBuilder {
        self.options.dlog_path.push(path.into());
        self
    }

    pub fn method_remap_file<P: Into<PathBuf>>(mut self, path: P) -> OptionsBuilder {
        self.options.method_remap_file = Some(path.into());
        self
    }

    pub fn escape_flow_insensitive(mut self, flow_insensitive: bool) -> OptionsBuilder {
        self.options.escape_flow_insensitive = flow_insensitive;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

impl Default for OptionsBuilder {
    fn default() -> OptionsBuilder {
        OptionsBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties() {
        let options = Options::from_properties(
            "# refinement\n\
             max.iters = 5\n\
             inst.ctxt.kind=co\n\
             kobj.k=2\n\
             trace.block.size=64\n\
             dlog.path=/a:/b\n\
             escape.flowins=true\n",
        )
        .unwrap();

        assert_eq!(options.max_iters(), 5);
        assert_eq!(options.inst_ctxt_kind(), CtxtKind::Object);
        assert_eq!(options.stat_ctxt_kind(), CtxtKind::Insensitive);
        assert_eq!(options.kobj_k(), 2);
        assert_eq!(options.kcfa_k(), 1);
        assert_eq!(options.trace_block_size(), 64);
        assert_eq!(options.dlog_path().len(), 2);
        assert!(options.escape_flow_insensitive());
    }

    #[test]
    fn invalid_properties() {
        assert!(matches!(
            Options::from_properties("kobj.k=two"),
            Err(Error::InvalidOption { .. })
        ));
        assert!(matches!(
            Options::from_properties("ctxt.kind=xx"),
            Err(Error::InvalidOption { .. })
        ));
        assert!(matches!(
            Options::from_properties("trace.block.size=4"),
            Err(Error::InvalidOption { .. })
        ));
        assert!(Options::from_properties("no.such.key=1").is_err());
    }

    #[test]
    fn json() {
        let options: Options =
            serde_json::from_str(r#"{"max_iters": 3, "inst_ctxt_kind": "cs", "kcfa_k": 2}"#)
                .unwrap();
        assert_eq!(options.max_iters(), 3);
        assert_eq!(options.inst_ctxt_kind(), CtxtKind::CallSite);
        assert_eq!(options.kcfa_k(), 2);
        assert_eq!(options.trace_block_size(), 4096);
    }
}
