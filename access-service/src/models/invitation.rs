//! Invitation model - pending offers of membership or roles on a resource.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Pending invitation. Accepted and rescinded invitations are deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invitation {
    pub invitation_id: Uuid,
    /// Invitee. Always a user identity.
    pub identity_id: Uuid,
    /// Resource the invitation grants access to. For teams and organizations
    /// this is the resource backing the group identity.
    pub resource_id: Uuid,
    pub member: bool,
    pub role_ids: Vec<Uuid>,
    /// SHA-256 of the single-use accept code. The raw code is only ever
    /// handed to the invitee.
    #[serde(skip_serializing)]
    pub accept_code_hash: String,
    pub redirect_on_success: Option<String>,
    pub redirect_on_failure: Option<String>,
    pub issuer_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl Invitation {
    /// Create a new invitation together with its raw accept code.
    pub fn new(
        identity_id: Uuid,
        resource_id: Uuid,
        member: bool,
        role_ids: Vec<Uuid>,
        redirect_on_success: Option<String>,
        redirect_on_failure: Option<String>,
        issuer_id: Uuid,
    ) -> (Self, String) {
        let accept_code = generate_accept_code();
        let invitation = Self {
            invitation_id: Uuid::new_v4(),
            identity_id,
            resource_id,
            member,
            role_ids,
            accept_code_hash: hash_accept_code(&accept_code),
            redirect_on_success,
            redirect_on_failure,
            issuer_id,
            created_utc: Utc::now(),
        };
        (invitation, accept_code)
    }
}

/// Generate a random single-use accept code (256 bits, hex encoded).
pub fn generate_accept_code() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash an accept code for storage and lookup.
pub fn hash_accept_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
