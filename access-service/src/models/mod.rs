pub mod identity;
pub mod invitation;
pub mod privilege;
pub mod resource;
pub mod resource_type;
pub mod role;
pub mod token;

pub use identity::{Identity, IdentityKind};
pub use invitation::{generate_accept_code, hash_accept_code, Invitation};
pub use privilege::PrivilegeCacheEntry;
pub use resource::Resource;
pub use resource_type::ResourceType;
pub use role::{IdentityRole, Role};
pub use token::{Token, TokenPrivilege, TokenStatus, TokenType};
