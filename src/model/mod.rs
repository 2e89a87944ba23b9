pub mod event;
pub mod position;
pub mod request;

pub use event::{ChangeEvent, ColumnValue, EventKind, RowImage};
pub use position::Position;
pub use request::{QueueItem, Request, RequestOp};
