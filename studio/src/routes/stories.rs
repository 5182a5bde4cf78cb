use axum::{
    extract::State,
    response::Json,
};
use narrator::{GenerationRequest, StoryResponse};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;

pub async fn generate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<GenerationRequest>,
) -> ApiResult<Json<StoryResponse>> {
    let pipeline = state.stories.pipeline()?;
    tracing::info!(
        "Story request for '{}' (full: {})",
        request.topic,
        request.generate_full
    );
    let response = pipeline.handle(&request).await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct TopicsQuery {
    pub count: Option<usize>,
}

pub async fn topics(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TopicsQuery>,
) -> ApiResult<Json<Value>> {
    let pipeline = state.stories.pipeline()?;
    let count = query.count.unwrap_or(pipeline.config().topic_count);
    let topics = pipeline.propose_topics(count).await?;
    Ok(Json(json!({ "topics": topics })))
}
