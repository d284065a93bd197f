//! A single hot, multi-subscriber stream with bounded fan-out.
//!
//! Topics ride a bounded broadcast ring: emissions are never buffered for
//! absent subscribers, every live subscriber sees every emission in order,
//! and a slow subscriber lags without blocking fast ones. On overflow the
//! oldest undelivered items are dropped and the subscriber's next delivery
//! is flagged as lossy.

use tokio::sync::broadcast;

/// Outcome of publishing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered to this many live subscribers.
    Delivered(usize),
    /// Nobody is listening. Not an error.
    NoSubscribers,
}

impl PublishOutcome {
    /// Number of subscribers the item reached.
    pub fn subscriber_count(&self) -> usize {
        match self {
            Self::Delivered(count) => *count,
            Self::NoSubscribers => 0,
        }
    }
}

/// One item handed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    /// The published item.
    pub item: T,
    /// True when items were dropped for this subscriber since its previous
    /// delivery (queue overflow, drop-oldest policy).
    pub lost_events: bool,
}

/// A hot multi-subscriber stream.
#[derive(Debug)]
pub struct Topic<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a topic whose subscribers each buffer up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an item to every live subscriber.
    pub fn publish(&self, item: T) -> PublishOutcome {
        match self.sender.send(item) {
            Ok(count) => PublishOutcome::Delivered(count),
            Err(_) => {
                tracing::trace!("topic publish with no active subscribers");
                PublishOutcome::NoSubscribers
            }
        }
    }

    /// Attach a new subscriber. Only future emissions are delivered.
    pub fn subscribe(&self) -> TopicSubscriber<T> {
        TopicSubscriber {
            receiver: self.sender.subscribe(),
            lost_events: false,
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Receiving end of a topic. Dropping it detaches the subscriber.
#[derive(Debug)]
pub struct TopicSubscriber<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<T>,
    lost_events: bool,
}

impl<T: Clone + Send + 'static> TopicSubscriber<T> {
    /// Receive the next delivery.
    ///
    /// When this subscriber overflowed, the skipped items are dropped
    /// (oldest first) and the next delivery carries `lost_events = true`.
    /// Returns `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => {
                    let lost_events = std::mem::take(&mut self.lost_events);
                    return Some(Delivery { item, lost_events });
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.lost_events = true;
                    tracing::warn!(
                        skipped = count,
                        "subscriber lagged behind, dropping oldest events"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, for draining in tests and teardown paths.
    pub fn try_recv(&mut self) -> Option<Delivery<T>> {
        loop {
            match self.receiver.try_recv() {
                Ok(item) => {
                    let lost_events = std::mem::take(&mut self.lost_events);
                    return Some(Delivery { item, lost_events });
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.lost_events = true;
                    tracing::warn!(
                        skipped = count,
                        "subscriber lagged behind, dropping oldest events"
                    );
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}
