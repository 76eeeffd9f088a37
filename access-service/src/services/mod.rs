//! Services layer for access-service.
//!
//! Resolution, caching, the role graph, invitations and the token lifecycle
//! sit on top of the repository traits; external collaborators are injected
//! as trait objects.

pub mod invitation;
pub mod jwt;
pub mod maintenance;
pub mod notification_client;
pub mod privilege_cache;
pub mod resolver;
pub mod role_graph;
pub mod token;
pub mod workspace_client;

pub use invitation::{AcceptOutcome, InvitationRequest, InvitationService};
pub use jwt::{JwtService, Permission, TokenClaims, TokenResponse};
pub use maintenance::TokenPurgeJob;
pub use notification_client::{
    DeliveryHandle, Message, MockNotificationSender, NotificationClient, NotificationSender,
};
pub use privilege_cache::PrivilegeCacheService;
pub use resolver::AuthorizationResolver;
pub use role_graph::RoleGraphService;
pub use token::{AuditOutcome, AuthenticatedToken, LinkedAccount, TokenGrant, TokenService};
pub use workspace_client::{HttpWorkspaceClient, MockWorkspaceClient, Space, WorkspaceClient};
