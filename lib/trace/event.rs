use std::fmt;

bitflags! {
    /// Selects which events an instrumented program emits.
    pub struct InstrScheme: u32 {
        const NEW          = 1 << 0;
        const NEW_ARRAY    = 1 << 1;
        const FIELD_READ   = 1 << 2;
        const FIELD_WRITE  = 1 << 3;
        const ARRAY_READ   = 1 << 4;
        const ARRAY_WRITE  = 1 << 5;
        const STATIC_WRITE = 1 << 6;
        const ACQUIRE_LOCK = 1 << 7;
        const THREAD_START = 1 << 8;
        const THREAD_SPAWN = 1 << 9;
        const METHOD_ENTER = 1 << 10;
        const METHOD_LEAVE = 1 << 11;
        const HEAP = Self::FIELD_READ.bits | Self::FIELD_WRITE.bits
            | Self::ARRAY_READ.bits | Self::ARRAY_WRITE.bits;
        const ALLOC = Self::NEW.bits | Self::NEW_ARRAY.bits;
    }
}

/// The kind of an event, which fixes its opcode and number of operands.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum EventKind {
    New,
    NewArray,
    FieldRead,
    FieldWrite,
    ArrayRead,
    ArrayWrite,
    StaticWrite,
    AcquireLock,
    ThreadStart,
    ThreadSpawn,
    MethodEnter,
    MethodLeave,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::New,
        EventKind::NewArray,
        EventKind::FieldRead,
        EventKind::FieldWrite,
        EventKind::ArrayRead,
        EventKind::ArrayWrite,
        EventKind::StaticWrite,
        EventKind::AcquireLock,
        EventKind::ThreadStart,
        EventKind::ThreadSpawn,
        EventKind::MethodEnter,
        EventKind::MethodLeave,
    ];

    pub fn opcode(self) -> i32 {
        match self {
            EventKind::New => 1,
            EventKind::NewArray => 2,
            EventKind::FieldRead => 3,
            EventKind::FieldWrite => 4,
            EventKind::ArrayRead => 5,
            EventKind::ArrayWrite => 6,
            EventKind::StaticWrite => 7,
            EventKind::AcquireLock => 8,
            EventKind::ThreadStart => 9,
            EventKind::ThreadSpawn => 10,
            EventKind::MethodEnter => 11,
            EventKind::MethodLeave => 12,
        }
    }

    pub fn from_opcode(opcode: i32) -> Option<EventKind> {
        EventKind::ALL.iter().cloned().find(|k| k.opcode() == opcode)
    }

    /// Number of operands following the opcode.
    pub fn arity(self) -> usize {
        match self {
            EventKind::StaticWrite | EventKind::ThreadStart | EventKind::ThreadSpawn => 1,
            EventKind::New
            | EventKind::NewArray
            | EventKind::AcquireLock
            | EventKind::MethodEnter
            | EventKind::MethodLeave => 2,
            EventKind::FieldRead | EventKind::ArrayRead => 3,
            EventKind::FieldWrite | EventKind::ArrayWrite => 4,
        }
    }

    pub fn flag(self) -> InstrScheme {
        match self {
            EventKind::New => InstrScheme::NEW,
            EventKind::NewArray => InstrScheme::NEW_ARRAY,
            EventKind::FieldRead => InstrScheme::FIELD_READ,
            EventKind::FieldWrite => InstrScheme::FIELD_WRITE,
            EventKind::ArrayRead => InstrScheme::ARRAY_READ,
            EventKind::ArrayWrite => InstrScheme::ARRAY_WRITE,
            EventKind::StaticWrite => InstrScheme::STATIC_WRITE,
            EventKind::AcquireLock => InstrScheme::ACQUIRE_LOCK,
            EventKind::ThreadStart => InstrScheme::THREAD_START,
            EventKind::ThreadSpawn => InstrScheme::THREAD_SPAWN,
            EventKind::MethodEnter => InstrScheme::METHOD_ENTER,
            EventKind::MethodLeave => InstrScheme::METHOD_LEAVE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::New => "NEW",
            EventKind::NewArray => "NEW_ARRAY",
            EventKind::FieldRead => "FIELD_READ",
            EventKind::FieldWrite => "FIELD_WRITE",
            EventKind::ArrayRead => "ARRAY_READ",
            EventKind::ArrayWrite => "ARRAY_WRITE",
            EventKind::StaticWrite => "STATIC_WRITE",
            EventKind::AcquireLock => "ACQUIRE_LOCK",
            EventKind::ThreadStart => "THREAD_START",
            EventKind::ThreadSpawn => "THREAD_SPAWN",
            EventKind::MethodEnter => "METHOD_ENTER",
            EventKind::MethodLeave => "METHOD_LEAVE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One event of a trace.
///
/// Site, statement, field and method operands are indices into the domains
/// `H`, `E`, `F`, `M` and `L`. Object operands are runtime object ids, with 0
/// standing for `null`. A negative index marks an operand the instrumentation
/// could not resolve.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Event {
    New { site: i32, object: i32 },
    NewArray { site: i32, object: i32 },
    FieldRead { expr: i32, base: i32, field: i32 },
    FieldWrite { expr: i32, base: i32, field: i32, value: i32 },
    ArrayRead { expr: i32, base: i32, index: i32 },
    ArrayWrite { expr: i32, base: i32, index: i32, value: i32 },
    StaticWrite { value: i32 },
    AcquireLock { site: i32, object: i32 },
    ThreadStart { object: i32 },
    ThreadSpawn { object: i32 },
    MethodEnter { object: i32, method: i32 },
    MethodLeave { object: i32, method: i32 },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::New { .. } => EventKind::New,
            Event::NewArray { .. } => EventKind::NewArray,
            Event::FieldRead { .. } => EventKind::FieldRead,
            Event::FieldWrite { .. } => EventKind::FieldWrite,
            Event::ArrayRead { .. } => EventKind::ArrayRead,
            Event::ArrayWrite { .. } => EventKind::ArrayWrite,
            Event::StaticWrite { .. } => EventKind::StaticWrite,
            Event::AcquireLock { .. } => EventKind::AcquireLock,
            Event::ThreadStart { .. } => EventKind::ThreadStart,
            Event::ThreadSpawn { .. } => EventKind::ThreadSpawn,
            Event::MethodEnter { .. } => EventKind::MethodEnter,
            Event::MethodLeave { .. } => EventKind::MethodLeave,
        }
    }

    /// The operands in wire order.
    pub fn operands(&self) -> Vec<i32> {
        match *self {
            Event::New { site, object }
            | Event::NewArray { site, object }
            | Event::AcquireLock { site, object } => vec![site, object],
            Event::FieldRead { expr, base, field } => vec![expr, base, field],
            Event::FieldWrite {
                expr,
                base,
                field,
                value,
            } => vec![expr, base, field, value],
            Event::ArrayRead { expr, base, index } => vec![expr, base, index],
            Event::ArrayWrite {
                expr,
                base,
                index,
                value,
            } => vec![expr, base, index, value],
            Event::StaticWrite { value } => vec![value],
            Event::ThreadStart { object } | Event::ThreadSpawn { object } => vec![object],
            Event::MethodEnter { object, method } | Event::MethodLeave { object, method } => {
                vec![object, method]
            }
        }
    }

    /// Builds an event from operands in wire order. `operands` must hold
    /// exactly `kind.arity()` values.
    pub fn from_operands(kind: EventKind, operands: &[i32]) -> Option<Event> {
        if operands.len() != kind.arity() {
            return None;
        }
        let o = operands;
        Some(match kind {
            EventKind::New => Event::New {
                site: o[0],
                object: o[1],
            },
            EventKind::NewArray => Event::NewArray {
                site: o[0],
                object: o[1],
            },
            EventKind::FieldRead => Event::FieldRead {
                expr: o[0],
                base: o[1],
                field: o[2],
            },
            EventKind::FieldWrite => Event::FieldWrite {
                expr: o[0],
                base: o[1],
                field: o[2],
                value: o[3],
            },
            EventKind::ArrayRead => Event::ArrayRead {
                expr: o[0],
                base: o[1],
                index: o[2],
            },
            EventKind::ArrayWrite => Event::ArrayWrite {
                expr: o[0],
                base: o[1],
                index: o[2],
                value: o[3],
            },
            EventKind::StaticWrite => Event::StaticWrite { value: o[0] },
            EventKind::AcquireLock => Event::AcquireLock {
                site: o[0],
                object: o[1],
            },
            EventKind::ThreadStart => Event::ThreadStart { object: o[0] },
            EventKind::ThreadSpawn => Event::ThreadSpawn { object: o[0] },
            EventKind::MethodEnter => Event::MethodEnter {
                object: o[0],
                method: o[1],
            },
            EventKind::MethodLeave => Event::MethodLeave {
                object: o[0],
                method: o[1],
            },
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let operands: Vec<String> = self.operands().iter().map(|o| o.to_string()).collect();
        write!(f, "{} {}", self.kind(), operands.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_are_unique() {
        for kind in EventKind::ALL.iter() {
            assert_eq!(EventKind::from_opcode(kind.opcode()), Some(*kind));
        }
        assert_eq!(EventKind::from_opcode(0), None);
        assert_eq!(EventKind::from_opcode(13), None);
    }

    #[test]
    fn operands_match_arity() {
        let event = Event::ArrayWrite {
            expr: 3,
            base: 7,
            index: 2,
            value: 0,
        };
        assert_eq!(event.operands().len(), EventKind::ArrayWrite.arity());
        assert_eq!(
            Event::from_operands(EventKind::ArrayWrite, &event.operands()),
            Some(event)
        );
        assert_eq!(Event::from_operands(EventKind::New, &[1]), None);
        assert_eq!(event.to_string(), "ARRAY_WRITE 3 7 2 0");
    }

    #[test]
    fn scheme_flags() {
        assert!(InstrScheme::HEAP.contains(InstrScheme::ARRAY_READ));
        assert!(!InstrScheme::HEAP.contains(EventKind::New.flag()));
        assert!(InstrScheme::all().contains(InstrScheme::METHOD_LEAVE));
    }
}
