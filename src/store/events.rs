/// Node-level change notifications delivered through one-shot watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

/// One watch firing.
///
/// `epoch` is the generation of the session that armed the watch; an event
/// carrying a different epoch or path than the subscription that receives it
/// is stale and must be ignored, not treated as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub path: String,
    pub epoch: u64,
}

/// Connection-level events emitted on a session's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session reached the connected state
    SyncConnected,
    /// Connectivity was lost; the session may or may not recover
    Disconnected,
    /// The store declared the session dead; it will never recover
    Expired,
}
