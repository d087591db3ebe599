use serde::{Deserialize, Serialize};

/// `?window_days=` on summary and insights routes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowQuery {
    #[serde(default)]
    pub window_days: Option<u32>,
}

/// `?limit=` on the weight history route.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Body of `POST /api/weights/retrain`; every field optional.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrainRequest {
    #[serde(default)]
    pub window_days: Option<u32>,
}
