use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Router,
};
use chrono::{
    DateTime,
    Utc,
};
use common::{
    http::{
        extract::Json,
        HttpResponseError,
    },
    types::{
        Labels,
        Operation,
        TimeSeriesPoint,
    },
};
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

use crate::engine::{
    QueryEngine,
    QueryRequest,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequestBody {
    metric_name: String,
    operation: String,
    #[serde(default)]
    labels: Option<Labels>,
    from: String,
    to: String,
}

fn parse_instant(field: &str, value: &str) -> anyhow::Result<DateTime<Utc>> {
    value.parse().map_err(|e| {
        anyhow::anyhow!(ErrorMetadata::bad_request(
            "InvalidTimeRange",
            format!("`{field}` is not an RFC 3339 timestamp: {e}"),
        ))
    })
}

impl QueryRequestBody {
    fn into_request(self) -> anyhow::Result<QueryRequest> {
        if self.metric_name.trim().is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidQueryRequest",
                "`metricName` must not be empty",
            ));
        }
        Ok(QueryRequest {
            metric_name: self.metric_name,
            operation: Operation::parse_request(&self.operation)?,
            // An empty filter matches everything, same as no filter.
            labels: self.labels.filter(|labels| !labels.is_empty()),
            from: parse_instant("from", &self.from)?,
            to: parse_instant("to", &self.to)?,
        })
    }
}

#[derive(Serialize)]
pub struct QueryResponse {
    series: Vec<TimeSeriesPoint>,
}

pub fn router(engine: Arc<QueryEngine>) -> Router {
    Router::new()
        .route("/query", post(query))
        .with_state(engine)
}

pub async fn query(
    State(engine): State<Arc<QueryEngine>>,
    Json(body): Json<QueryRequestBody>,
) -> Result<impl IntoResponse, HttpResponseError> {
    let request = body.into_request()?;
    let series = engine.execute(request).await?;
    Ok(Json(QueryResponse { series }))
}
