use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use super::types::UploadEvent;

/// Fan-out of lifecycle events. Every subscriber owns an unbounded queue, so a
/// slow reader never loses an event; closed receivers are pruned on the next
/// emit.
#[derive(Clone, Default)]
pub(crate) struct EventHub {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<UploadEvent>>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<UploadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FileId;

    #[tokio::test]
    async fn test_every_subscriber_gets_every_event() {
        let hub = EventHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        for _ in 0..1000 {
            hub.emit(UploadEvent::Removed { file_id: FileId::new() });
        }
        hub.emit(UploadEvent::Cancelled);

        for receiver in [&mut first, &mut second] {
            let mut count = 0;
            while let Ok(event) = receiver.try_recv() {
                count += 1;
                if count == 1001 {
                    assert!(matches!(event, UploadEvent::Cancelled));
                }
            }
            assert_eq!(count, 1001);
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let hub = EventHub::default();
        let kept = hub.subscribe();
        drop(hub.subscribe());

        hub.emit(UploadEvent::Cancelled);
        assert_eq!(hub.subscriber_count(), 1);
        drop(kept);
    }
}
