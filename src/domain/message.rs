use uuid::Uuid;

/// An envelope pulled from the queue.
///
/// The receiver owns the message until it is completed, abandoned, rescheduled
/// or dead-lettered. `processing_count` is maintained by the receiver and grows
/// by one on every abandon or reschedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub id: Uuid,
    pub body: String,
    pub processing_count: u32,
}

impl EventMessage {
    /// Creates a fresh, never-delivered message with a random id.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: body.into(),
            processing_count: 0,
        }
    }
}
