use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Invitation;
use crate::services::InvitationRequest;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IssueInvitationsRequest {
    #[validate(length(min = 1, message = "At least one invitation is required"))]
    pub invitations: Vec<InvitationRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvitationResponse {
    pub invitation_id: Uuid,
    pub identity_id: Uuid,
    pub resource_id: Uuid,
    pub member: bool,
    pub role_ids: Vec<Uuid>,
    pub redirect_on_success: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<Invitation> for InvitationResponse {
    fn from(invitation: Invitation) -> Self {
        Self {
            invitation_id: invitation.invitation_id,
            identity_id: invitation.identity_id,
            resource_id: invitation.resource_id,
            member: invitation.member,
            role_ids: invitation.role_ids,
            redirect_on_success: invitation.redirect_on_success,
            created_utc: invitation.created_utc,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AcceptResponse {
    pub resource_id: Uuid,
}
