use super::position::Position;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp {
    Upsert,
    Delete,
    Index,
}

/// A prepared destination operation, built by the Handler from a
/// `ChangeEvent` and a `Rule`. Immutable; the Dispatcher hands batches of
/// these to `DestinationEndpoint::publish` unchanged.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub target: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub op: RequestOp,
    pub origin: Position,
}

impl Request {
    pub fn new(
        target: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        op: RequestOp,
        origin: Position,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            routing_key: routing_key.into(),
            payload,
            op,
            origin,
        }
    }
}

/// What the Dispatcher pulls off the request queue. A single `ChangeEvent`
/// fans out into zero or more `Requests`, while rotate/xid/DDL events enqueue
/// control markers instead so ordering with published requests is preserved.
#[derive(Debug)]
pub enum QueueItem {
    Requests(Vec<Request>),
    PositionAdvance(Position),
    MetadataRefresh { schema: String, table: String },
}
