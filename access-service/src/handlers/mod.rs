//! HTTP handlers for access-service.

pub mod invitation;
pub mod resource;
pub mod token;
