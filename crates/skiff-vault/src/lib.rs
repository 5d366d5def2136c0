//! # skiff-vault
//!
//! Routes session features into unlocked vaults. A [`VaultRegistry`] is
//! installed as the session's feature decorator; every path-taking feature
//! handed out by the session is wrapped so each call is dispatched to the
//! vault whose root contains the path, or to the session itself.

pub mod proxy;
pub mod registry;
pub mod vault;

pub use proxy::VaultRegistryFeature;
pub use registry::VaultRegistry;
pub use vault::{NullVault, Vault};
