//! Provider resolver port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::task::ProviderBlock;

/// Resolves dynamic expressions in a provider block's arguments.
///
/// Provider arguments may reference catalog values (service addresses,
/// key-value entries) that are only known at driver-build time; the resolver
/// evaluates them against current catalog state.
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    /// Resolve a provider block's dynamic arguments to concrete values.
    async fn resolve(&self, block: &ProviderBlock) -> DomainResult<ProviderBlock>;
}
