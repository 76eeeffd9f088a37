//! Invitation workflow: issue, accept and rescind.
//!
//! A pending invitation is the only mutable state. Accepting consumes it by
//! deletion inside the same transaction that grants the assignments, so an
//! accept code can succeed at most once.

use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::notification_client::{Message, NotificationSender};
use super::privilege_cache::PrivilegeCacheService;
use super::resolver::AuthorizationResolver;
use super::workspace_client::WorkspaceClient;
use crate::models::resource_type::{RESOURCE_TYPE_ORGANIZATION, RESOURCE_TYPE_TEAM};
use crate::models::{hash_accept_code, Identity, Invitation, Resource, ResourceType, TokenStatus};
use crate::repository::{
    DynStore, IdentityRepository, InvitationRepository, ResourceRepository,
    ResourceTypeRepository, RoleRepository, TokenRepository,
};

/// One entry of an issue batch. The invitee is named by exactly one of
/// `identity_id`, `username` or `email`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct InvitationRequest {
    pub identity_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default)]
    pub member: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[validate(url)]
    pub redirect_on_success: Option<String>,
    #[validate(url)]
    pub redirect_on_failure: Option<String>,
}

impl InvitationRequest {
    pub fn member_of(identity_id: Uuid) -> Self {
        Self {
            identity_id: Some(identity_id),
            member: true,
            ..Self::default()
        }
    }

    pub fn roles_for(identity_id: Uuid, roles: &[&str]) -> Self {
        Self {
            identity_id: Some(identity_id),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Result of a successful accept.
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub resource_id: Uuid,
    pub redirect_on_success: Option<String>,
}

/// The resource an invitation batch targets.
struct InvitationTarget {
    resource: Resource,
    resource_type: ResourceType,
}

impl InvitationTarget {
    fn kind(&self) -> &'static str {
        match self.resource_type.name.as_str() {
            RESOURCE_TYPE_ORGANIZATION => "organization",
            RESOURCE_TYPE_TEAM => "team",
            _ if self.resource_type.is_space() => "space",
            _ => "resource",
        }
    }
}

/// An invitation that passed validation but is not yet persisted.
struct PreparedInvitation {
    invitation: Invitation,
    accept_code: String,
    invitee: Identity,
    role_names: Vec<String>,
}

pub struct InvitationService {
    store: DynStore,
    resolver: AuthorizationResolver,
    cache: Arc<PrivilegeCacheService>,
    notifications: Arc<dyn NotificationSender>,
    workspace: Arc<dyn WorkspaceClient>,
    accept_url_base: String,
}

impl InvitationService {
    pub fn new(
        store: DynStore,
        resolver: AuthorizationResolver,
        cache: Arc<PrivilegeCacheService>,
        notifications: Arc<dyn NotificationSender>,
        workspace: Arc<dyn WorkspaceClient>,
        accept_url_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            cache,
            notifications,
            workspace,
            accept_url_base: accept_url_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Issue a batch of invitations on `target_id`, which names either a
    /// resource or the team/organization identity backed by one.
    ///
    /// The batch is all-or-nothing: every entry is validated before any is
    /// persisted. Notification failures are logged and never undo issuance.
    #[instrument(skip(self, requests), fields(batch_size = requests.len()))]
    pub async fn issue(
        &self,
        issuer_id: Uuid,
        target_id: Uuid,
        requests: Vec<InvitationRequest>,
    ) -> Result<Vec<Invitation>, AppError> {
        if requests.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "at least one invitation is required"
            )));
        }

        let target = self.resolve_target(target_id).await?;
        self.authorize(issuer_id, &target).await?;

        let mut prepared = Vec::with_capacity(requests.len());
        for request in &requests {
            prepared.push(self.prepare(issuer_id, &target, request).await?);
        }

        let space_name = match self.enclosing_space(&target).await? {
            Some(space_id) => Some(self.workspace.get_space(space_id).await?.name),
            None => None,
        };

        let invitations: Vec<Invitation> =
            prepared.iter().map(|p| p.invitation.clone()).collect();
        self.store.create_invitations(&invitations).await?;

        tracing::info!(
            issuer_id = %issuer_id,
            resource_id = %target.resource.resource_id,
            count = invitations.len(),
            "Invitations issued"
        );

        self.notify(issuer_id, &target, space_name.as_deref(), &prepared)
            .await;

        Ok(invitations)
    }

    /// Consume an accept code, granting what the invitation describes.
    ///
    /// `NotFound` for unknown or already used codes.
    #[instrument(skip(self, accept_code))]
    pub async fn accept(&self, accept_code: &str) -> Result<AcceptOutcome, AppError> {
        let code_hash = hash_accept_code(accept_code);
        let pending = self
            .store
            .find_invitation_by_code_hash(&code_hash)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("invitation not found")))?;

        let subtree = self.store.list_subtree_ids(pending.resource_id).await?;
        let invitation = self.store.consume_invitation(&code_hash, &subtree).await?;

        self.cache
            .invalidate_resources(invitation.identity_id, &subtree)
            .await?;
        self.store
            .set_status_flags_for_identity(invitation.identity_id, TokenStatus::STALE)
            .await?;

        tracing::info!(
            invitation_id = %invitation.invitation_id,
            identity_id = %invitation.identity_id,
            resource_id = %invitation.resource_id,
            "Invitation accepted"
        );

        Ok(AcceptOutcome {
            resource_id: invitation.resource_id,
            redirect_on_success: invitation.redirect_on_success,
        })
    }

    /// Delete a pending invitation. Requires the same scope as issuing it.
    #[instrument(skip(self))]
    pub async fn rescind(&self, requester_id: Uuid, invitation_id: Uuid) -> Result<(), AppError> {
        let invitation = self
            .store
            .find_invitation(invitation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("invitation {} not found", invitation_id))
            })?;

        let target = self.resolve_target(invitation.resource_id).await?;
        self.authorize(requester_id, &target).await?;

        self.store.delete_invitation(invitation_id).await?;
        tracing::info!(invitation_id = %invitation_id, requester_id = %requester_id, "Invitation rescinded");
        Ok(())
    }

    /// Pending invitations on a target, visible to holders of its invite scope.
    pub async fn list_pending(
        &self,
        requester_id: Uuid,
        target_id: Uuid,
    ) -> Result<Vec<Invitation>, AppError> {
        let target = self.resolve_target(target_id).await?;
        self.authorize(requester_id, &target).await?;
        self.store
            .list_invitations_for_resource(target.resource.resource_id)
            .await
    }

    pub async fn find(&self, invitation_id: Uuid) -> Result<Option<Invitation>, AppError> {
        self.store.find_invitation(invitation_id).await
    }

    async fn resolve_target(&self, target_id: Uuid) -> Result<InvitationTarget, AppError> {
        let resource_id = match self.store.find_identity(target_id).await? {
            Some(identity) => identity.resource_id.ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "identity {} is not an organization or team",
                    target_id
                ))
            })?,
            None => target_id,
        };

        let resource = self.store.find_resource(resource_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("invitation target {} not found", target_id))
        })?;
        let resource_type = self
            .store
            .find_resource_type(resource.resource_type_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "resource type {} of resource {} missing",
                    resource.resource_type_id,
                    resource.resource_id
                ))
            })?;

        Ok(InvitationTarget {
            resource,
            resource_type,
        })
    }

    /// The target itself when it is a space, else its nearest space ancestor.
    async fn enclosing_space(&self, target: &InvitationTarget) -> Result<Option<Uuid>, AppError> {
        if target.resource_type.is_space() {
            return Ok(Some(target.resource.resource_id));
        }

        let mut next = target.resource.parent_resource_id;
        while let Some(resource_id) = next {
            let resource = self.store.find_resource(resource_id).await?.ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("parent resource {} missing", resource_id))
            })?;
            let is_space = self
                .store
                .find_resource_type(resource.resource_type_id)
                .await?
                .is_some_and(|t| t.is_space());
            if is_space {
                return Ok(Some(resource.resource_id));
            }
            next = resource.parent_resource_id;
        }
        Ok(None)
    }

    async fn authorize(&self, identity_id: Uuid, target: &InvitationTarget) -> Result<(), AppError> {
        let scope = target.resource_type.invite_scope.as_deref().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "resource type {} does not accept invitations",
                target.resource_type.name
            ))
        })?;

        if !self
            .resolver
            .has_scope(identity_id, target.resource.resource_id, scope)
            .await?
        {
            tracing::warn!(
                identity_id = %identity_id,
                resource_id = %target.resource.resource_id,
                scope,
                "Invitation management denied"
            );
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "identity {} lacks scope {} on resource {}",
                identity_id,
                scope,
                target.resource.resource_id
            )));
        }
        Ok(())
    }

    async fn prepare(
        &self,
        issuer_id: Uuid,
        target: &InvitationTarget,
        request: &InvitationRequest,
    ) -> Result<PreparedInvitation, AppError> {
        request.validate()?;

        let invitee = self.find_invitee(request).await?;
        if !invitee.is_user() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "identity {} is not a user and cannot be invited",
                invitee.identity_id
            )));
        }

        if !request.member && request.roles.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invitation for {} grants neither membership nor roles",
                invitee.identity_id
            )));
        }
        if request.member && !target.resource_type.allows_membership {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "resource type {} does not allow membership",
                target.resource_type.name
            )));
        }

        let mut role_ids = Vec::with_capacity(request.roles.len());
        for name in &request.roles {
            let role = self
                .store
                .find_role_by_name(target.resource_type.resource_type_id, name)
                .await?
                .ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!(
                        "role {} is not valid for resource type {}",
                        name,
                        target.resource_type.name
                    ))
                })?;
            if !role_ids.contains(&role.role_id) {
                role_ids.push(role.role_id);
            }
        }

        let (invitation, accept_code) = Invitation::new(
            invitee.identity_id,
            target.resource.resource_id,
            request.member,
            role_ids,
            request.redirect_on_success.clone(),
            request.redirect_on_failure.clone(),
            issuer_id,
        );

        Ok(PreparedInvitation {
            invitation,
            accept_code,
            invitee,
            role_names: request.roles.clone(),
        })
    }

    async fn find_invitee(&self, request: &InvitationRequest) -> Result<Identity, AppError> {
        let found = if let Some(identity_id) = request.identity_id {
            self.store.find_identity(identity_id).await?
        } else if let Some(username) = request.username.as_deref() {
            self.store.find_identity_by_username(username).await?
        } else if let Some(email) = request.email.as_deref() {
            self.store.find_identity_by_email(email).await?
        } else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invitee must be named by identity_id, username or email"
            )));
        };

        found.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("invitee not found")))
    }

    pub fn accept_url(&self, accept_code: &str) -> String {
        format!("{}/api/invitations/accept/{}", self.accept_url_base, accept_code)
    }

    async fn notify(
        &self,
        issuer_id: Uuid,
        target: &InvitationTarget,
        space_name: Option<&str>,
        prepared: &[PreparedInvitation],
    ) {
        let kind = target.kind();
        let messages: Vec<Message> = prepared
            .iter()
            .map(|p| {
                let variant = if p.role_names.is_empty() { "noroles" } else { "roles" };
                Message::to_identity(
                    p.invitee.identity_id,
                    issuer_id,
                    &format!("invitation.{}.{}", kind, variant),
                    serde_json::json!({
                        "invitee": p.invitee.username,
                        "resourceId": target.resource.resource_id,
                        "resourceName": target.resource.name,
                        "resourceType": kind,
                        "spaceName": space_name,
                        "roleNames": p.role_names,
                        "acceptURL": self.accept_url(&p.accept_code),
                    }),
                )
            })
            .collect();

        match self.notifications.send_messages_async(messages).await {
            Ok(handle) => {
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(())) => tracing::debug!("Invitation notifications delivered"),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Invitation notification delivery failed")
                        }
                        Err(_) => tracing::warn!("Invitation notification delivery abandoned"),
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "Failed to queue invitation notifications"),
        }
    }
}
