//! Dynamic thread-escape analysis.
//!
//! Replays the event trace of an instrumented run and finds the heap
//! accesses whose base object was reachable from more than one thread. An
//! object escapes when it is stored into a static field or started as a
//! thread, and everything reachable from an escaping object through its
//! fields and array elements escapes with it.
//!
//! Flow-sensitively, an access escapes if its base object has escaped at the
//! time of the access. Flow-insensitively, it escapes if any object allocated
//! at the same site as its base ever escapes.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::options::Options;
use crate::project::{Project, Task};
use crate::store::RelSign;
use crate::trace::{process, EventHandler, TraceReader};
use crate::Error;

/// Escape state built from trace events. Operands are indices into `E` and
/// `H`; object id 0 is null.
#[derive(Debug, Default)]
pub struct ThreadEscape {
    num_e: usize,
    num_h: usize,
    escaping: FxHashSet<i32>,
    /// Non-null fields and array elements of each object.
    fields: FxHashMap<i32, FxHashMap<i32, i32>>,
    alloc_site: FxHashMap<i32, usize>,
    escaping_sites: FxHashSet<usize>,
    /// Accesses waiting for their base's allocation site to escape.
    pending: FxHashMap<usize, BTreeSet<usize>>,
    visited: BTreeSet<usize>,
    flow_sen_esc: BTreeSet<usize>,
    flow_ins_esc: BTreeSet<usize>,
}

impl ThreadEscape {
    pub fn new(num_e: usize, num_h: usize) -> ThreadEscape {
        ThreadEscape {
            num_e,
            num_h,
            ..ThreadEscape::default()
        }
    }

    pub fn visited(&self) -> &BTreeSet<usize> {
        &self.visited
    }

    pub fn flow_sensitive_escaping(&self) -> &BTreeSet<usize> {
        &self.flow_sen_esc
    }

    pub fn flow_insensitive_escaping(&self) -> &BTreeSet<usize> {
        &self.flow_ins_esc
    }

    /// Allocation sites with an escaping object.
    pub fn escaping_sites(&self) -> usize {
        self.escaping_sites.len()
    }

    fn access_index(&self, expr: i32) -> Option<usize> {
        if expr < 0 {
            return None;
        }
        let e = expr as usize;
        if e < self.num_e {
            Some(e)
        } else {
            warn!("Heap access {} is outside domain E ({} elements)", e, self.num_e);
            None
        }
    }

    fn heap_access(&mut self, expr: i32, base: i32) {
        let e = match self.access_index(expr) {
            Some(e) if base != 0 => e,
            _ => return,
        };
        self.visited.insert(e);
        if self.escaping.contains(&base) {
            self.flow_sen_esc.insert(e);
        }
        if !self.flow_ins_esc.contains(&e) {
            if let Some(&h) = self.alloc_site.get(&base) {
                if self.escaping_sites.contains(&h) {
                    self.flow_ins_esc.insert(e);
                } else {
                    self.pending.entry(h).or_default().insert(e);
                }
            }
        }
    }

    fn heap_write(&mut self, expr: i32, base: i32, field: i32, value: i32) {
        self.heap_access(expr, base);
        if base == 0 || field < 0 {
            return;
        }
        if value == 0 {
            if let Some(fields) = self.fields.get_mut(&base) {
                fields.remove(&field);
            }
            return;
        }
        self.fields.entry(base).or_default().insert(field, value);
        if self.escaping.contains(&base) {
            self.mark_escaping(value);
        }
    }

    fn mark_escaping(&mut self, object: i32) {
        let mut worklist = vec![object];
        while let Some(object) = worklist.pop() {
            if object == 0 || !self.escaping.insert(object) {
                continue;
            }
            if let Some(&h) = self.alloc_site.get(&object) {
                if self.escaping_sites.insert(h) {
                    if let Some(accesses) = self.pending.remove(&h) {
                        self.flow_ins_esc.extend(accesses);
                    }
                }
            }
            if let Some(fields) = self.fields.get(&object) {
                worklist.extend(fields.values().cloned());
            }
        }
    }

    fn allocate(&mut self, site: i32, object: i32) {
        if object == 0 {
            return;
        }
        self.fields.remove(&object);
        self.escaping.remove(&object);
        self.alloc_site.remove(&object);
        if site >= 0 && (site as usize) < self.num_h {
            self.alloc_site.insert(object, site as usize);
        }
    }
}

impl EventHandler for ThreadEscape {
    fn new_object(&mut self, site: i32, object: i32) -> Result<(), Error> {
        self.allocate(site, object);
        Ok(())
    }

    fn new_array(&mut self, site: i32, object: i32) -> Result<(), Error> {
        self.allocate(site, object);
        Ok(())
    }

    fn field_read(&mut self, expr: i32, base: i32, _field: i32) -> Result<(), Error> {
        self.heap_access(expr, base);
        Ok(())
    }

    fn field_write(&mut self, expr: i32, base: i32, field: i32, value: i32) -> Result<(), Error> {
        self.heap_write(expr, base, field, value);
        Ok(())
    }

    fn array_read(&mut self, expr: i32, base: i32, _index: i32) -> Result<(), Error> {
        self.heap_access(expr, base);
        Ok(())
    }

    fn array_write(&mut self, expr: i32, base: i32, index: i32, value: i32) -> Result<(), Error> {
        self.heap_write(expr, base, index, value);
        Ok(())
    }

    fn static_write(&mut self, value: i32) -> Result<(), Error> {
        self.mark_escaping(value);
        Ok(())
    }

    fn thread_start(&mut self, object: i32) -> Result<(), Error> {
        self.mark_escaping(object);
        Ok(())
    }
}

/// Runs `ThreadEscape` over the configured trace and publishes `visitedE`
/// and `escE`.
pub struct ThreadEscapeTask {
    trace_file: Option<PathBuf>,
    block_size: usize,
    flow_insensitive: bool,
}

impl ThreadEscapeTask {
    pub fn from_options(options: &Options) -> ThreadEscapeTask {
        ThreadEscapeTask {
            trace_file: options.trace_file().map(|path| path.to_path_buf()),
            block_size: options.trace_block_size(),
            flow_insensitive: options.escape_flow_insensitive(),
        }
    }
}

impl Task for ThreadEscapeTask {
    fn name(&self) -> &str {
        "dynamic-thread-escape"
    }

    fn consumes(&self) -> Vec<String> {
        vec!["E".to_string(), "H".to_string()]
    }

    fn produces(&self) -> Vec<String> {
        vec!["visitedE".to_string(), "escE".to_string()]
    }

    fn signatures(&self) -> Vec<(String, RelSign)> {
        ["visitedE", "escE"]
            .iter()
            .filter_map(|name| {
                RelSign::with_default_order(&["E0"])
                    .ok()
                    .map(|sign| (name.to_string(), sign))
            })
            .collect()
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        let path = self.trace_file.as_ref().ok_or_else(|| Error::InvalidOption {
            key: "trace.file".to_string(),
            message: "no trace to analyse".to_string(),
        })?;
        let store = project.store_mut();
        let mut analysis = ThreadEscape::new(store.domain_size("E")?, store.domain_size("H")?);
        let mut reader = TraceReader::open(path, self.block_size)?;
        let events = process(&mut reader, &mut analysis)?;

        let escaping = if self.flow_insensitive {
            analysis.flow_insensitive_escaping()
        } else {
            analysis.flow_sensitive_escaping()
        };
        info!(
            "{} events: {} accesses visited, {} escaping, {} escaping allocation sites",
            events,
            analysis.visited().len(),
            escaping.len(),
            analysis.escaping_sites()
        );

        for (name, accesses) in [("visitedE", analysis.visited()), ("escE", escaping)] {
            let relation = store.zero_relation(name)?;
            for &e in accesses {
                relation.add(&[e])?;
            }
            store.save_relation(name)?;
            store.close_relation(name)?;
        }
        Ok(())
    }
}
