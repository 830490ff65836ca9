pub mod queue_entries;
pub mod registrants;
