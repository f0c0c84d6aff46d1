use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Weak};

use crate::options::{Options, MIN_TRACE_BLOCK_SIZE};
use crate::trace::buffer::BlockWriter;
use crate::trace::{Event, EventKind, InstrScheme, ProtocolError};
use crate::Error;

/// The id of a runtime object in a trace.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId(pub i32);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

struct Entry {
    id: i32,
    object: Weak<dyn Any + Send + Sync>,
}

struct IdTable {
    next: i32,
    entries: FxHashMap<usize, Entry>,
    inserted_since_sweep: usize,
}

const SWEEP_INTERVAL: usize = 4096;

/// Hands out ids to runtime objects.
///
/// Ids start at 1 and are never reused; 0 is `null`. Objects are keyed by
/// identity and only weakly referenced, so tracing never keeps an object
/// alive. All assignments go through one lock.
pub struct ObjectIds {
    table: Mutex<IdTable>,
}

impl ObjectIds {
    pub fn new() -> ObjectIds {
        ObjectIds {
            table: Mutex::new(IdTable {
                next: 1,
                entries: FxHashMap::default(),
                inserted_since_sweep: 0,
            }),
        }
    }

    /// The id of `object`, assigning a fresh one the first time it is seen.
    ///
    /// # Errors
    /// `ProtocolError::ObjectIdsExhausted` once every positive `i32` is taken.
    pub fn id_of<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Result<ObjectId, Error> {
        let address = Arc::as_ptr(object) as *const () as usize;
        let mut table = self.table.lock();

        if let Some(entry) = table.entries.get(&address) {
            if entry.object.strong_count() > 0 {
                return Ok(ObjectId(entry.id));
            }
        }

        let id = table.next;
        table.next = id
            .checked_add(1)
            .ok_or(ProtocolError::ObjectIdsExhausted)?;
        let weak: Weak<T> = Arc::downgrade(object);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        table.entries.insert(address, Entry { id, object: weak });

        table.inserted_since_sweep += 1;
        if table.inserted_since_sweep >= SWEEP_INTERVAL {
            table.entries.retain(|_, entry| entry.object.strong_count() > 0);
            table.inserted_since_sweep = 0;
        }

        Ok(ObjectId(id))
    }

    /// Like `id_of`, mapping `None` to `ObjectId::NULL`.
    pub fn id_of_opt<T: Any + Send + Sync>(
        &self,
        object: Option<&Arc<T>>,
    ) -> Result<ObjectId, Error> {
        match object {
            Some(object) => self.id_of(object),
            None => Ok(ObjectId::NULL),
        }
    }

    /// Number of tracked objects that are still alive.
    pub fn live(&self) -> usize {
        self.table
            .lock()
            .entries
            .values()
            .filter(|entry| entry.object.strong_count() > 0)
            .count()
    }
}

impl Default for ObjectIds {
    fn default() -> ObjectIds {
        ObjectIds::new()
    }
}

/// Serializes events into frames.
///
/// Frames are written under a lock, so each frame is contiguous and events
/// from one thread keep their order.
pub struct TraceWriter<W: Write> {
    out: Mutex<BlockWriter<W>>,
    events: Mutex<u64>,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W, block_size: usize) -> Result<TraceWriter<W>, Error> {
        if block_size < MIN_TRACE_BLOCK_SIZE {
            return Err(Error::InvalidOption {
                key: "trace.block.size".to_string(),
                message: format!("{} is smaller than {}", block_size, MIN_TRACE_BLOCK_SIZE),
            });
        }
        Ok(TraceWriter {
            out: Mutex::new(BlockWriter::new(out, block_size)),
            events: Mutex::new(0),
        })
    }

    pub fn write(&self, event: &Event) -> Result<(), Error> {
        let mut out = self.out.lock();
        out.put_i32(event.kind().opcode())?;
        for operand in event.operands() {
            out.put_i32(operand)?;
        }
        *self.events.lock() += 1;
        Ok(())
    }

    pub fn events_written(&self) -> u64 {
        *self.events.lock()
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.out.lock().flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, Error> {
        Ok(self.out.into_inner().into_inner()?)
    }
}

/// The runtime side of tracing: what instrumentation calls into.
///
/// A `Tracer` is created by `init` when the traced program starts and
/// finished by `done` when it exits. Events whose kind is not part of the
/// tracer's `InstrScheme` are dropped.
pub struct Tracer<W: Write> {
    ids: ObjectIds,
    writer: TraceWriter<W>,
    scheme: InstrScheme,
}

impl Tracer<File> {
    /// Starts tracing into the file at `path`.
    pub fn init<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        scheme: InstrScheme,
    ) -> Result<Tracer<File>, Error> {
        let file = File::create(path.as_ref())?;
        info!(
            "Tracing {:?} to {} (block size {})",
            scheme,
            path.as_ref().display(),
            block_size
        );
        Tracer::new(file, block_size, scheme)
    }

    /// Starts tracing into the trace file named by `options`.
    pub fn from_options(options: &Options, scheme: InstrScheme) -> Result<Tracer<File>, Error> {
        let path = options
            .trace_file()
            .ok_or_else(|| Error::InvalidOption {
                key: "trace.file".to_string(),
                message: "no trace file configured".to_string(),
            })?;
        Tracer::init(path, options.trace_block_size(), scheme)
    }
}

impl<W: Write> Tracer<W> {
    pub fn new(out: W, block_size: usize, scheme: InstrScheme) -> Result<Tracer<W>, Error> {
        Ok(Tracer {
            ids: ObjectIds::new(),
            writer: TraceWriter::new(out, block_size)?,
            scheme,
        })
    }

    pub fn scheme(&self) -> InstrScheme {
        self.scheme
    }

    /// The id of a runtime object.
    pub fn id<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Result<ObjectId, Error> {
        self.ids.id_of(object)
    }

    pub fn ids(&self) -> &ObjectIds {
        &self.ids
    }

    fn emit(&self, event: Event) -> Result<(), Error> {
        if self.scheme.contains(event.kind().flag()) {
            self.writer.write(&event)
        } else {
            Ok(())
        }
    }

    fn wants(&self, kind: EventKind) -> bool {
        self.scheme.contains(kind.flag())
    }

    pub fn new_object<T: Any + Send + Sync>(&self, site: i32, object: &Arc<T>) -> Result<(), Error> {
        if !self.wants(EventKind::New) {
            return Ok(());
        }
        let object = self.id(object)?.0;
        self.emit(Event::New { site, object })
    }

    pub fn new_array<T: Any + Send + Sync>(&self, site: i32, array: &Arc<T>) -> Result<(), Error> {
        if !self.wants(EventKind::NewArray) {
            return Ok(());
        }
        let object = self.id(array)?.0;
        self.emit(Event::NewArray { site, object })
    }

    pub fn field_read(&self, expr: i32, base: ObjectId, field: i32) -> Result<(), Error> {
        self.emit(Event::FieldRead {
            expr,
            base: base.0,
            field,
        })
    }

    pub fn field_write(
        &self,
        expr: i32,
        base: ObjectId,
        field: i32,
        value: ObjectId,
    ) -> Result<(), Error> {
        self.emit(Event::FieldWrite {
            expr,
            base: base.0,
            field,
            value: value.0,
        })
    }

    pub fn array_read(&self, expr: i32, base: ObjectId, index: i32) -> Result<(), Error> {
        self.emit(Event::ArrayRead {
            expr,
            base: base.0,
            index,
        })
    }

    pub fn array_write(
        &self,
        expr: i32,
        base: ObjectId,
        index: i32,
        value: ObjectId,
    ) -> Result<(), Error> {
        self.emit(Event::ArrayWrite {
            expr,
            base: base.0,
            index,
            value: value.0,
        })
    }

    pub fn static_write(&self, value: ObjectId) -> Result<(), Error> {
        self.emit(Event::StaticWrite { value: value.0 })
    }

    pub fn acquire_lock(&self, site: i32, object: ObjectId) -> Result<(), Error> {
        self.emit(Event::AcquireLock {
            site,
            object: object.0,
        })
    }

    pub fn thread_start(&self, thread: ObjectId) -> Result<(), Error> {
        self.emit(Event::ThreadStart { object: thread.0 })
    }

    pub fn thread_spawn(&self, thread: ObjectId) -> Result<(), Error> {
        self.emit(Event::ThreadSpawn { object: thread.0 })
    }

    /// `receiver` is `ObjectId::NULL` for static methods.
    pub fn method_enter(&self, receiver: ObjectId, method: i32) -> Result<(), Error> {
        self.emit(Event::MethodEnter {
            object: receiver.0,
            method,
        })
    }

    pub fn method_leave(&self, receiver: ObjectId, method: i32) -> Result<(), Error> {
        self.emit(Event::MethodLeave {
            object: receiver.0,
            method,
        })
    }

    pub fn events_written(&self) -> u64 {
        self.writer.events_written()
    }

    /// Finishes the trace, flushing every buffered frame.
    pub fn done(self) -> Result<W, Error> {
        info!("Trace done: {} events", self.writer.events_written());
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ids_follow_identity() {
        let ids = ObjectIds::new();
        let a = Arc::new(5u32);
        let b = Arc::new(5u32);
        let id_a = ids.id_of(&a).unwrap();
        let id_b = ids.id_of(&b).unwrap();

        assert_eq!(id_a, ObjectId(1));
        assert_eq!(id_b, ObjectId(2));
        assert_eq!(ids.id_of(&a.clone()).unwrap(), id_a);
        assert_eq!(ids.id_of_opt::<u32>(None).unwrap(), ObjectId::NULL);
    }

    #[test]
    fn ids_are_not_reused_after_drop() {
        let ids = ObjectIds::new();
        let a = Arc::new(String::from("a"));
        let first = ids.id_of(&a).unwrap();
        drop(a);
        assert_eq!(ids.live(), 0);
        let b = Arc::new(String::from("b"));
        assert!(ids.id_of(&b).unwrap() > first);
    }

    #[test]
    fn concurrent_assignment() {
        let ids = ObjectIds::new();
        let shared: Vec<Arc<u64>> = (0..64).map(Arc::new).collect();

        let seen: Vec<Vec<ObjectId>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| shared.iter().map(|o| ids.id_of(o).unwrap()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for ids_of_thread in &seen[1..] {
            assert_eq!(ids_of_thread, &seen[0]);
        }
        let mut distinct = seen[0].clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 64);
        assert!(distinct.iter().all(|id| !id.is_null()));
    }

    #[test]
    fn scheme_filters_events() {
        let tracer = Tracer::new(Vec::new(), 16, InstrScheme::THREAD_START).unwrap();
        let thread = Arc::new(());
        tracer.new_object(3, &thread).unwrap();
        tracer.thread_start(tracer.id(&thread).unwrap()).unwrap();
        tracer.method_enter(ObjectId::NULL, 4).unwrap();
        assert_eq!(tracer.events_written(), 1);
        let bytes = tracer.done().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 9, 0, 0, 0, 1]);
    }

    #[test]
    fn ids_run_out() {
        let ids = ObjectIds::new();
        ids.table.lock().next = i32::MAX - 1;
        let a = Arc::new(1u8);
        let b = Arc::new(2u8);
        assert_eq!(ids.id_of(&a).unwrap(), ObjectId(i32::MAX - 1));
        assert!(matches!(
            ids.id_of(&b),
            Err(Error::Protocol(ProtocolError::ObjectIdsExhausted))
        ));
        // Known objects keep their id.
        assert_eq!(ids.id_of(&a).unwrap(), ObjectId(i32::MAX - 1));
    }

    #[test]
    fn method_events_in_frame_order() {
        let tracer = Tracer::new(Vec::new(), 16, InstrScheme::all()).unwrap();
        tracer.method_enter(ObjectId(7), 3).unwrap();
        tracer.method_leave(ObjectId(7), 3).unwrap();
        let bytes = tracer.done().unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 11, 0, 0, 0, 7, 0, 0, 0, 3, 0, 0, 0, 12, 0, 0, 0, 7, 0, 0, 0, 3]
        );
    }

    #[test]
    fn tiny_blocks_rejected() {
        assert!(TraceWriter::new(Vec::new(), 4).is_err());
    }
}
