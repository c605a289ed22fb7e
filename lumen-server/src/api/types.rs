//! Response bodies for the HTTP endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub engine_type: String,
}

impl EngineInfo {
    pub fn picture(id: &str, model_name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: model_name.to_string(),
            description: format!("{model_name} with streamed denoising previews"),
            engine_type: "PICTURE".to_string(),
        }
    }
}
