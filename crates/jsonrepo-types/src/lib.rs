//! Foundation types for jsonrepo.
//!
//! This crate provides the identity types shared by every jsonrepo crate.
//! Storage backends depend on `jsonrepo-types` to learn how an entity
//! identifies itself; they never look at any other field.
//!
//! # Key Types
//!
//! - [`EntityId`] — random 128-bit identifier (UUID v4), assigned once
//! - [`Entity`] — the identity contract every persisted record implements

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::TypeError;
pub use id::EntityId;
