// protocol.rs - Request/response envelopes and typed params for the host methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use embed_pipeline::Metric;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ResponseOk<T: Serialize> {
    pub id: String,
    pub result: T,
}

#[derive(Debug, Serialize)]
pub struct ResponseErr {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedParams {
    pub texts: Vec<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankParams {
    pub query: String,
    pub candidates: Vec<String>,
    #[serde(default)]
    pub metric: Metric,
    /// Add "query: " / "passage: " prefixes before embedding.
    #[serde(default)]
    pub prefixes: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreParams {
    pub query: Vec<f32>,
    pub candidates: Vec<Vec<f32>>,
    #[serde(default)]
    pub metric: Metric,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedText {
    pub index: usize,
    pub text: String,
    pub score: f32,
}
