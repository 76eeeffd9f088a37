pub mod invitation;
pub mod resource;
pub mod token;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Not found: invitation not found")]
    pub error: String,
}
