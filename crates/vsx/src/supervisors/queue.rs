//! 📬 RefreshQueue: the one shared buffer between "please refresh" and
//! "refreshing now".
//!
//! 🎬 *[a producer knocks. the queue checks its clipboard. "we're full," it
//! says, and closes the door. politely. immediately. nobody waits outside.]*
//!
//! Built on a bounded `async_channel`. Enqueue never blocks: `try_send` either
//! lands the request or bounces it straight back as [`QueueError`]. Every
//! accepted request is received by exactly one consumer, in the order it was
//! accepted.

use async_channel::{Receiver, Sender, TrySendError};
use tracing::{info, warn};

use crate::common::SourceRef;
use crate::errors::QueueError;

#[derive(Debug, Clone)]
pub struct RefreshQueue {
    tx: Sender<SourceRef>,
    rx: Receiver<SourceRef>,
}

impl RefreshQueue {
    /// A capacity of zero is bumped to one; async-channel has no rendezvous mode.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// 📥 Hand a source to the consumers, or say why not. Never blocks, never drops.
    pub fn enqueue(&self, source: SourceRef) -> Result<(), QueueError> {
        match self.tx.try_send(source.clone()) {
            Ok(()) => {
                info!(source = %source, pending = self.tx.len(), "📬 refresh enqueued");
                Ok(())
            }
            Err(TrySendError::Full(source)) => {
                warn!(source = %source, capacity = ?self.tx.capacity(), "🚧 refresh queue full, request rejected");
                Err(QueueError::Full(source))
            }
            Err(TrySendError::Closed(source)) => {
                warn!(source = %source, "🔒 refresh queue closed, request rejected");
                Err(QueueError::Closed(source))
            }
        }
    }

    /// 📤 A consumer end. Clones share the queue; each item goes to one of them.
    pub(crate) fn receiver(&self) -> Receiver<SourceRef> {
        self.rx.clone()
    }

    /// 🔒 Stop accepting. Items already accepted stay receivable until drained.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// How many accepted requests no consumer has picked up yet.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_queue_says_full_instead_of_waiting() {
        let queue = RefreshQueue::new(2);

        assert_eq!(queue.enqueue("http://a".into()), Ok(()));
        assert_eq!(queue.enqueue("http://b".into()), Ok(()));
        assert_eq!(
            queue.enqueue("http://c".into()),
            Err(QueueError::Full("http://c".into()))
        );
        assert_eq!(queue.pending(), 2, "nothing was dropped to make room");
    }

    #[tokio::test]
    async fn the_one_where_first_in_is_first_out() {
        let queue = RefreshQueue::new(8);
        let rx = queue.receiver();
        for source in ["http://a", "http://b", "http://c"] {
            queue.enqueue(source.into()).expect("💀 room for three");
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.expect("💀 item should be there"));
        }

        assert_eq!(
            seen,
            vec![
                SourceRef::new("http://a"),
                SourceRef::new("http://b"),
                SourceRef::new("http://c")
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_closing_keeps_what_was_already_accepted() {
        let queue = RefreshQueue::new(4);
        let rx = queue.receiver();
        queue.enqueue("http://early".into()).expect("💀 room for one");

        assert!(queue.close());
        assert!(queue.is_closed());
        assert_eq!(
            queue.enqueue("http://late".into()),
            Err(QueueError::Closed("http://late".into()))
        );
        assert_eq!(rx.recv().await, Ok(SourceRef::new("http://early")));
        assert!(rx.recv().await.is_err(), "closed and drained");
    }

    #[tokio::test]
    async fn the_one_where_two_consumers_never_get_the_same_item() {
        let queue = RefreshQueue::new(16);
        let (left, right) = (queue.receiver(), queue.receiver());
        for n in 0..10 {
            queue.enqueue(SourceRef::new(format!("http://{n}"))).expect("💀 room");
        }
        queue.close();

        let mut seen = Vec::new();
        while let Ok(source) = left.recv().await {
            seen.push(source);
            if let Ok(source) = right.recv().await {
                seen.push(source);
            }
        }

        let delivered = seen.len();
        seen.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        seen.dedup();
        assert_eq!((delivered, seen.len()), (10, 10), "every item exactly once");
    }
}
