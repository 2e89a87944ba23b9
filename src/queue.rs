use crate::model::QueueItem;
use tokio::sync::mpsc;

/// The bounded channel between Handler and Dispatcher. A fixed capacity
/// gives the Handler natural backpressure: once the Dispatcher falls behind
/// (a slow destination, a paused endpoint), the Handler's `send` blocks
/// rather than buffering unboundedly in memory.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

pub fn request_queue(capacity: usize) -> (RequestSender, RequestReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RequestSender(tx), RequestReceiver(rx))
}

#[derive(Clone)]
pub struct RequestSender(mpsc::Sender<QueueItem>);

impl RequestSender {
    pub async fn send(&self, item: QueueItem) -> Result<(), mpsc::error::SendError<QueueItem>> {
        self.0.send(item).await
    }
}

pub struct RequestReceiver(mpsc::Receiver<QueueItem>);

impl RequestReceiver {
    pub async fn recv(&mut self) -> Option<QueueItem> {
        self.0.recv().await
    }
}
