pub mod queue_entry;
pub mod registrant;

pub use queue_entry::{QueueEntry, RequestStatus, UpdateStatus};
pub use registrant::Registrant;
