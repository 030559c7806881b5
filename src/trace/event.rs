use std::fmt;

/// EventKind identifies the kind of heap trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    Alloc = 1,
    ReAlloc = 2,
    Free = 3,
    StackCapture = 4,
}

/// Maximum EventKind value, used for array sizing.
pub const MAX_EVENT_KIND: usize = 4;

impl EventKind {
    /// Returns the canonical log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alloc => "alloc",
            Self::ReAlloc => "realloc",
            Self::Free => "free",
            Self::StackCapture => "stack_capture",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Alloc),
            2 => Some(Self::ReAlloc),
            3 => Some(Self::Free),
            4 => Some(Self::StackCapture),
            _ => None,
        }
    }

    /// Return all event kinds in numeric order.
    pub fn all() -> &'static [Self] {
        &[Self::Alloc, Self::ReAlloc, Self::Free, Self::StackCapture]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A heap allocation completed in the target process.
#[derive(Debug, Clone, Copy)]
pub struct AllocEvent {
    pub pid: u32,
    pub tid: u32,
    pub address: u64,
    pub size: u64,
}

/// A heap reallocation. Reported for completeness; correlation treats it
/// as a pass-through no-op because the facility also reports the paired
/// alloc/free in common configurations.
#[derive(Debug, Clone, Copy)]
pub struct ReAllocEvent {
    pub pid: u32,
    pub tid: u32,
    pub old_address: u64,
    pub new_address: u64,
    pub old_size: u64,
    pub new_size: u64,
}

/// A heap free. Carries no stack context; correlation is by address.
#[derive(Debug, Clone, Copy)]
pub struct FreeEvent {
    pub pid: u32,
    pub tid: u32,
    pub address: u64,
}

/// The call stack captured immediately after an allocation on the same
/// thread. The facility guarantees temporal adjacency but no structural
/// link, so correlation is thread-based.
#[derive(Debug, Clone)]
pub struct StackCaptureEvent {
    pub pid: u32,
    pub tid: u32,
    /// Return addresses in capture order.
    pub addresses: Vec<u64>,
}

/// One event from the trace source, in stream order.
#[derive(Debug, Clone)]
pub enum HeapEvent {
    Alloc(AllocEvent),
    ReAlloc(ReAllocEvent),
    Free(FreeEvent),
    StackCapture(StackCaptureEvent),
}

impl HeapEvent {
    /// The kind label for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Alloc(_) => EventKind::Alloc,
            Self::ReAlloc(_) => EventKind::ReAlloc,
            Self::Free(_) => EventKind::Free,
            Self::StackCapture(_) => EventKind::StackCapture,
        }
    }

    /// Originating process id.
    pub fn pid(&self) -> u32 {
        match self {
            Self::Alloc(e) => e.pid,
            Self::ReAlloc(e) => e.pid,
            Self::Free(e) => e.pid,
            Self::StackCapture(e) => e.pid,
        }
    }

    /// Originating thread id.
    pub fn tid(&self) -> u32 {
        match self {
            Self::Alloc(e) => e.tid,
            Self::ReAlloc(e) => e.tid,
            Self::Free(e) => e.tid,
            Self::StackCapture(e) => e.tid,
        }
    }
}
