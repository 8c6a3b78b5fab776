use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Issues job identifiers of the form `job-<instance>-<sequence>`.
///
/// The instance part is drawn once per generator, so ids stay unique across
/// service instances while the sequence keeps them ordered within one.
#[derive(Debug)]
pub struct JobIdGenerator {
    instance: String,
    next: AtomicU64,
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl JobIdGenerator {
    pub fn new() -> Self {
        let mut instance = Uuid::new_v4().simple().to_string();
        instance.truncate(8);
        Self {
            instance,
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("job-{}-{}", self.instance, seq)
    }
}
