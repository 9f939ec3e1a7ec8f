// Task Queue & Broker Port
//
// Competing consumers, at-least-once delivery. A delivered but unacknowledged
// message becomes visible again once its visibility timeout elapses.

use crate::domain::{Delivery, DeliveryReceipt, TaskDescriptor};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Publish a descriptor
    async fn publish(&self, task: &TaskDescriptor) -> Result<()>;

    /// Claim one visible message, hiding it from other consumers for `visibility`
    async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>>;

    /// Acknowledge consumption; the message is never delivered again
    ///
    /// Returns false if the receipt is stale (message redelivered or already acked).
    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<bool>;

    /// Push the visibility deadline of an in-flight delivery (heartbeat)
    async fn extend(&self, receipt: &DeliveryReceipt, visibility: Duration) -> Result<bool>;

    /// Give the message back for immediate redelivery
    async fn release(&self, receipt: &DeliveryReceipt) -> Result<bool>;

    /// Messages not yet acknowledged (visible or in flight)
    async fn outstanding(&self) -> Result<i64>;

    /// Whether any unacknowledged message carries `job_id`
    async fn has_outstanding(&self, job_id: &str) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct Message {
        descriptor: TaskDescriptor,
        visible_at: i64,
        receipt: Option<String>,
        delivery_count: u32,
        acked: bool,
    }

    #[derive(Default)]
    struct QueueState {
        messages: Vec<Message>,
        next_receipt: u64,
    }

    /// In-memory broker with visibility-timeout semantics
    #[derive(Clone)]
    pub struct InMemoryTaskQueue {
        state: Arc<Mutex<QueueState>>,
        time_provider: Arc<dyn TimeProvider>,
        unavailable: Arc<AtomicBool>,
    }

    impl InMemoryTaskQueue {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                state: Arc::new(Mutex::new(QueueState::default())),
                time_provider,
                unavailable: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Simulate an unreachable broker
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Total deliveries made for a job (including redeliveries)
        pub fn delivery_count(&self, job_id: &str) -> u32 {
            self.state
                .lock()
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.descriptor.job_id == job_id)
                .map(|m| m.delivery_count)
                .sum()
        }

        /// Number of messages published for a job
        pub fn published_count(&self, job_id: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .messages
                .iter()
                .filter(|m| m.descriptor.job_id == job_id)
                .count()
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Queue("broker unreachable".to_string()));
            }
            Ok(())
        }

        fn with_receipt(
            &self,
            receipt: &DeliveryReceipt,
            f: impl FnOnce(&mut Message, i64),
        ) -> Result<bool> {
            self.check()?;
            let now = self.time_provider.now_millis();
            let mut state = self.state.lock().unwrap();
            match state
                .messages
                .iter_mut()
                .find(|m| !m.acked && m.receipt.as_deref() == Some(receipt.as_str()))
            {
                Some(message) => {
                    f(message, now);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[async_trait]
    impl TaskQueue for InMemoryTaskQueue {
        async fn publish(&self, task: &TaskDescriptor) -> Result<()> {
            self.check()?;
            self.state.lock().unwrap().messages.push(Message {
                descriptor: task.clone(),
                visible_at: i64::MIN,
                receipt: None,
                delivery_count: 0,
                acked: false,
            });
            Ok(())
        }

        async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>> {
            self.check()?;
            let now = self.time_provider.now_millis();
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let Some(message) = state
                .messages
                .iter_mut()
                .find(|m| !m.acked && m.visible_at <= now)
            else {
                return Ok(None);
            };

            state.next_receipt += 1;
            let receipt = format!("receipt-{}", state.next_receipt);
            message.receipt = Some(receipt.clone());
            message.visible_at = now + visibility.as_millis() as i64;
            message.delivery_count += 1;

            Ok(Some(Delivery {
                descriptor: message.descriptor.clone(),
                receipt: DeliveryReceipt::new(receipt),
                delivery_count: message.delivery_count,
            }))
        }

        async fn ack(&self, receipt: &DeliveryReceipt) -> Result<bool> {
            self.with_receipt(receipt, |m, _| m.acked = true)
        }

        async fn extend(&self, receipt: &DeliveryReceipt, visibility: Duration) -> Result<bool> {
            self.with_receipt(receipt, |m, now| {
                m.visible_at = now + visibility.as_millis() as i64
            })
        }

        async fn release(&self, receipt: &DeliveryReceipt) -> Result<bool> {
            self.with_receipt(receipt, |m, now| {
                m.visible_at = now;
                m.receipt = None;
            })
        }

        async fn outstanding(&self) -> Result<i64> {
            self.check()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .messages
                .iter()
                .filter(|m| !m.acked)
                .count() as i64)
        }

        async fn has_outstanding(&self, job_id: &str) -> Result<bool> {
            self.check()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .messages
                .iter()
                .any(|m| !m.acked && m.descriptor.job_id == job_id))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::BlobRef;
        use crate::port::time_provider::mocks::ManualClock;

        fn descriptor(id: &str) -> TaskDescriptor {
            TaskDescriptor {
                job_id: id.to_string(),
                input_ref: BlobRef::new("in"),
                enqueued_at: 0,
            }
        }

        #[tokio::test]
        async fn test_single_consumer_until_visibility_expires() {
            let clock = Arc::new(ManualClock::new(1_000));
            let queue = InMemoryTaskQueue::new(clock.clone());
            queue.publish(&descriptor("job-1")).await.unwrap();

            let first = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
            assert_eq!(first.delivery_count, 1);
            assert!(queue.receive(Duration::from_secs(30)).await.unwrap().is_none());

            clock.advance(30_001);
            let second = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
            assert_eq!(second.descriptor.job_id, "job-1");
            assert_eq!(second.delivery_count, 2);

            // The first receipt went stale on redelivery
            assert!(!queue.ack(&first.receipt).await.unwrap());
            assert!(queue.ack(&second.receipt).await.unwrap());
            assert_eq!(queue.outstanding().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_extend_and_release() {
            let clock = Arc::new(ManualClock::new(0));
            let queue = InMemoryTaskQueue::new(clock.clone());
            queue.publish(&descriptor("job-1")).await.unwrap();

            let d = queue.receive(Duration::from_secs(10)).await.unwrap().unwrap();
            clock.advance(9_000);
            assert!(queue.extend(&d.receipt, Duration::from_secs(10)).await.unwrap());
            clock.advance(9_000);
            assert!(queue.receive(Duration::from_secs(10)).await.unwrap().is_none());

            assert!(queue.release(&d.receipt).await.unwrap());
            assert!(queue.receive(Duration::from_secs(10)).await.unwrap().is_some());
        }
    }
}
