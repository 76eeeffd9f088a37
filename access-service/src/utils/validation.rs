use service_core::axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use service_core::error::AppError;
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body that has passed `validator` checks. Malformed JSON is a
/// `BadRequest`; failed validation is a `ValidationError` (422).
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;
        Ok(ValidatedJson(value))
    }
}
