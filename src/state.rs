use std::sync::Arc;

use crate::store::QueueEntryStore;
use crate::worker::TaskSender;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub queue: Arc<dyn QueueEntryStore>,
    pub tasks: TaskSender,
}
