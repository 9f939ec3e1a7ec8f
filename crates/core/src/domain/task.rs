// Task Queue Domain Model

use crate::domain::job::{BlobRef, JobId};
use serde::{Deserialize, Serialize};

/// Broker wire message: routes one job to an available worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub job_id: JobId,
    pub input_ref: BlobRef,
    pub enqueued_at: i64, // epoch ms
}

/// Opaque handle used to acknowledge or extend one delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryReceipt(String);

impl DeliveryReceipt {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A descriptor handed to exactly one consumer until acked or its visibility expires
#[derive(Debug, Clone)]
pub struct Delivery {
    pub descriptor: TaskDescriptor,
    pub receipt: DeliveryReceipt,
    /// 1 on first delivery, >1 on redelivery
    pub delivery_count: u32,
}
