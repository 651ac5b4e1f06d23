use std::sync::Arc;

use storage::StorageGateway;

use crate::gateway::MetadataGateway;
use crate::recorder::RecordingSupervisor;
use crate::retention::RetentionSweeper;
use crate::stream::StreamingManager;

pub mod cleanup;
pub mod recording;
pub mod stream;

#[derive(Clone)]
pub struct AppState {
    pub recorder: Arc<RecordingSupervisor>,
    pub streams: Arc<StreamingManager>,
    pub sweeper: Arc<RetentionSweeper>,
    pub metadata: Arc<dyn MetadataGateway>,
    pub storage: Arc<dyn StorageGateway>,
}
