// crates/runner-fleet-core/src/core/mod.rs
// ============================================================================
// Module: Runner Fleet Core Types
// Description: Canonical entity, identifier, and change-event structures.
// Purpose: Provide stable, serializable types shared by store and watcher.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Core types describe the fleet entities as the store returns them, the
//! parameter structs callers pass in, and the immutable change events the
//! store publishes after each committed mutation.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod change;
pub mod controller;
pub mod crypto;
pub mod file;
pub mod hashing;
pub mod identifiers;
pub mod instance;
pub mod job;
pub mod owner;
pub mod pagination;
pub mod pool;
pub mod tags;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use change::ChangeEvent;
pub use change::ChangePayload;
pub use change::EntityType;
pub use change::Operation;
pub use controller::ControllerInfo;
pub use controller::UpdateControllerParams;
pub use crypto::PASSPHRASE_LEN;
pub use crypto::Passphrase;
pub use crypto::SecretCipher;
pub use file::CreateFileObjectParams;
pub use file::FileObject;
pub use file::UpdateFileObjectParams;
pub use hashing::StreamingDigest;
pub use hashing::hex_encode;
pub use identifiers::EntityId;
pub use identifiers::OwnerKind;
pub use identifiers::OwnerRef;
pub use instance::Address;
pub use instance::AddressKind;
pub use instance::CreateInstanceParams;
pub use instance::Instance;
pub use instance::InstanceParent;
pub use instance::InstanceStatus;
pub use instance::RunnerStatus;
pub use instance::StatusMessage;
pub use instance::UpdateInstanceParams;
pub use job::Job;
pub use job::JobStatus;
pub use owner::AuthType;
pub use owner::CreateCredentialsParams;
pub use owner::CreateOwnerParams;
pub use owner::Credentials;
pub use owner::Owner;
pub use owner::PoolBalancer;
pub use owner::UpdateCredentialsParams;
pub use owner::UpdateOwnerParams;
pub use pagination::DEFAULT_PAGE_SIZE;
pub use pagination::Page;
pub use pagination::PageRequest;
pub use pool::CreatePoolParams;
pub use pool::CreateScaleSetParams;
pub use pool::OsArch;
pub use pool::OsType;
pub use pool::Pool;
pub use pool::ScaleSet;
pub use pool::UpdatePoolParams;
pub use pool::UpdateScaleSetParams;
pub use tags::normalize_tags;
