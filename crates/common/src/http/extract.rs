use axum::{
    extract::{
        FromRequest,
        Request,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use errors::ErrorMetadata;
use serde::{
    de::DeserializeOwned,
    Serialize,
};

use crate::http::HttpResponseError;

/// `axum::Json` whose rejection is a `BadJsonBody` [`HttpResponseError`], so
/// malformed bodies get the same error shape and reporting as any other
/// client error.
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = HttpResponseError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(anyhow::anyhow!(ErrorMetadata::bad_request(
                "BadJsonBody",
                rejection.body_text(),
            ))
            .into()),
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}
