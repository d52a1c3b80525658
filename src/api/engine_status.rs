use serde::{Deserialize, Serialize};

use crate::logic::model::ModelStatus;
use crate::logic::scheduler::MetricsSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub app_version: String,
    pub config_version: u64,

    pub cnn_enabled: bool,
    pub model: Option<ModelStatus>,
    pub scheduler: MetricsSnapshot,

    pub diagnostics: bool,
    pub bypass_active: bool,
}
