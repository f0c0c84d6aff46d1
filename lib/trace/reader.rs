use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::trace::buffer::BlockReader;
use crate::trace::{Event, EventKind, ProtocolError};
use crate::Error;

/// Decodes the frames of a trace.
pub struct TraceReader<R: Read> {
    input: BlockReader<R>,
}

impl TraceReader<File> {
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<TraceReader<File>, Error> {
        Ok(TraceReader::new(File::open(path)?, block_size))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(input: R, block_size: usize) -> TraceReader<R> {
        TraceReader {
            input: BlockReader::new(input, block_size),
        }
    }

    /// The next event, or `None` once the trace ends on a frame boundary.
    pub fn next_event(&mut self) -> Result<Option<Event>, Error> {
        if self.input.at_end()? {
            return Ok(None);
        }
        let offset = self.input.offset();
        let opcode = self.read_operand(offset, None)?;
        let kind = EventKind::from_opcode(opcode)
            .ok_or(ProtocolError::UnknownOpcode { opcode, offset })?;

        let mut operands = Vec::with_capacity(kind.arity());
        for _ in 0..kind.arity() {
            operands.push(self.read_operand(offset, Some(kind))?);
        }
        Event::from_operands(kind, &operands)
            .map(Some)
            .ok_or_else(|| Error::from(ProtocolError::Truncated { kind: None, offset }))
    }

    fn read_operand(&mut self, offset: u64, kind: Option<EventKind>) -> Result<i32, Error> {
        match self.input.get_i32() {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::Truncated { kind, offset }.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<Event, Error>;

    fn next(&mut self) -> Option<Result<Event, Error>> {
        self.next_event().transpose()
    }
}

/// Receives the events of a trace, one method per kind.
///
/// Every method does nothing by default, so a handler only implements the
/// kinds it cares about.
#[allow(unused_variables)]
pub trait EventHandler {
    fn new_object(&mut self, site: i32, object: i32) -> Result<(), Error> {
        Ok(())
    }
    fn new_array(&mut self, site: i32, object: i32) -> Result<(), Error> {
        Ok(())
    }
    fn field_read(&mut self, expr: i32, base: i32, field: i32) -> Result<(), Error> {
        Ok(())
    }
    fn field_write(&mut self, expr: i32, base: i32, field: i32, value: i32) -> Result<(), Error> {
        Ok(())
    }
    fn array_read(&mut self, expr: i32, base: i32, index: i32) -> Result<(), Error> {
        Ok(())
    }
    fn array_write(&mut self, expr: i32, base: i32, index: i32, value: i32) -> Result<(), Error> {
        Ok(())
    }
    fn static_write(&mut self, value: i32) -> Result<(), Error> {
        Ok(())
    }
    fn acquire_lock(&mut self, site: i32, object: i32) -> Result<(), Error> {
        Ok(())
    }
    fn thread_start(&mut self, object: i32) -> Result<(), Error> {
        Ok(())
    }
    fn thread_spawn(&mut self, object: i32) -> Result<(), Error> {
        Ok(())
    }
    fn method_enter(&mut self, object: i32, method: i32) -> Result<(), Error> {
        Ok(())
    }
    fn method_leave(&mut self, object: i32, method: i32) -> Result<(), Error> {
        Ok(())
    }
}

/// Sends one event to the matching handler method.
pub fn dispatch<H: EventHandler + ?Sized>(handler: &mut H, event: &Event) -> Result<(), Error> {
    match *event {
        Event::New { site, object } => handler.new_object(site, object),
        Event::NewArray { site, object } => handler.new_array(site, object),
        Event::FieldRead { expr, base, field } => handler.field_read(expr, base, field),
        Event::FieldWrite {
            expr,
            base,
            field,
            value,
        } => handler.field_write(expr, base, field, value),
        Event::ArrayRead { expr, base, index } => handler.array_read(expr, base, index),
        Event::ArrayWrite {
            expr,
            base,
            index,
            value,
        } => handler.array_write(expr, base, index, value),
        Event::StaticWrite { value } => handler.static_write(value),
        Event::AcquireLock { site, object } => handler.acquire_lock(site, object),
        Event::ThreadStart { object } => handler.thread_start(object),
        Event::ThreadSpawn { object } => handler.thread_spawn(object),
        Event::MethodEnter { object, method } => handler.method_enter(object, method),
        Event::MethodLeave { object, method } => handler.method_leave(object, method),
    }
}

/// Feeds a whole trace to `handler`, returning the number of events.
pub fn process<R: Read, H: EventHandler + ?Sized>(
    reader: &mut TraceReader<R>,
    handler: &mut H,
) -> Result<u64, Error> {
    let mut count = 0;
    while let Some(event) = reader.next_event()? {
        dispatch(handler, &event)?;
        count += 1;
    }
    debug!("Processed {} trace events", count);
    Ok(count)
}

/// Writes a trace as text, one event per line.
pub fn print_trace<R: Read, W: Write>(
    reader: &mut TraceReader<R>,
    out: &mut W,
) -> Result<u64, Error> {
    let mut count = 0;
    while let Some(event) = reader.next_event()? {
        writeln!(out, "{}", event)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InstrScheme, ObjectId, TraceWriter, Tracer};
    use std::sync::Arc;

    fn encode(events: &[Event], block_size: usize) -> Vec<u8> {
        let writer = TraceWriter::new(Vec::new(), block_size).unwrap();
        for event in events {
            writer.write(event).unwrap();
        }
        writer.into_inner().unwrap()
    }

    fn every_kind() -> Vec<Event> {
        vec![
            Event::New { site: 0, object: 1 },
            Event::NewArray { site: 1, object: 2 },
            Event::FieldRead {
                expr: 4,
                base: 1,
                field: 3,
            },
            Event::FieldWrite {
                expr: 5,
                base: 1,
                field: 3,
                value: 2,
            },
            Event::ArrayRead {
                expr: 6,
                base: 2,
                index: -1,
            },
            Event::ArrayWrite {
                expr: 7,
                base: 2,
                index: 0,
                value: 0,
            },
            Event::StaticWrite { value: 1 },
            Event::AcquireLock { site: 2, object: 1 },
            Event::ThreadStart { object: 1 },
            Event::ThreadSpawn { object: 1 },
            Event::MethodEnter {
                object: 0,
                method: 9,
            },
            Event::MethodLeave {
                object: 0,
                method: 9,
            },
        ]
    }

    #[test]
    fn round_trip() {
        let events = every_kind();
        // 12 is not a multiple of most frame sizes, so frames straddle blocks.
        let bytes = encode(&events, 12);
        let decoded: Vec<Event> = TraceReader::new(&bytes[..], 12)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn empty_trace() {
        let mut reader = TraceReader::new(&[][..], 4096);
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn truncated_frame() {
        let bytes = encode(&every_kind()[..4], 64);
        let cut = &bytes[..bytes.len() - 2];
        let mut reader = TraceReader::new(cut, 64);
        for _ in 0..3 {
            assert!(reader.next_event().unwrap().is_some());
        }
        match reader.next_event() {
            Err(Error::Protocol(ProtocolError::Truncated { kind, offset })) => {
                assert_eq!(kind, Some(EventKind::FieldWrite));
                assert_eq!(offset, 3 * 4 + 3 * 4 + 4 * 4);
            }
            other => panic!("expected a truncated frame, got {:?}", other),
        }
    }

    #[test]
    fn truncated_opcode() {
        let mut reader = TraceReader::new(&[0u8, 0][..], 64);
        assert!(matches!(
            reader.next_event(),
            Err(Error::Protocol(ProtocolError::Truncated { kind: None, .. }))
        ));
    }

    #[test]
    fn unknown_opcode() {
        let mut bytes = encode(&[Event::StaticWrite { value: 3 }], 64);
        bytes.extend_from_slice(&[0, 0, 0, 99]);
        let mut reader = TraceReader::new(&bytes[..], 64);
        assert!(reader.next_event().unwrap().is_some());
        assert!(matches!(
            reader.next_event(),
            Err(Error::Protocol(ProtocolError::UnknownOpcode {
                opcode: 99,
                offset: 8
            }))
        ));
    }

    #[derive(Default)]
    struct Counter {
        news: usize,
        starts: Vec<i32>,
    }

    impl EventHandler for Counter {
        fn new_object(&mut self, _site: i32, _object: i32) -> Result<(), Error> {
            self.news += 1;
            Ok(())
        }

        fn thread_start(&mut self, object: i32) -> Result<(), Error> {
            self.starts.push(object);
            Ok(())
        }
    }

    #[test]
    fn tracer_to_handler() {
        let tracer = Tracer::new(Vec::new(), 32, InstrScheme::all()).unwrap();
        let thread = Arc::new("worker");
        let data = Arc::new(vec![1, 2, 3]);
        tracer.new_object(0, &thread).unwrap();
        tracer.new_object(1, &data).unwrap();
        tracer
            .field_write(2, tracer.id(&thread).unwrap(), 0, tracer.id(&data).unwrap())
            .unwrap();
        tracer.thread_start(tracer.id(&thread).unwrap()).unwrap();
        tracer.static_write(ObjectId::NULL).unwrap();
        let bytes = tracer.done().unwrap();

        let mut counter = Counter::default();
        let mut reader = TraceReader::new(&bytes[..], 32);
        assert_eq!(process(&mut reader, &mut counter).unwrap(), 5);
        assert_eq!(counter.news, 2);
        assert_eq!(counter.starts, vec![1]);
    }

    #[test]
    fn print() {
        let bytes = encode(&every_kind()[..2], 16);
        let mut out = Vec::new();
        print_trace(&mut TraceReader::new(&bytes[..], 16), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "NEW 0 1\nNEW_ARRAY 1 2\n");
    }
}
