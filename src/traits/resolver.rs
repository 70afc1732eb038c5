use async_trait::async_trait;

use crate::error::ResolveError;

/// Maps the local part of a recipient address to the address mail for it
/// should be forwarded to.
///
/// Called once per accepted `RCPT`. Any `Fn(&str) -> Result<String, ResolveError>`
/// is a resolver.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<String, ResolveError>;
}

#[async_trait]
impl<F> Resolver for F
where
    F: Fn(&str) -> Result<String, ResolveError> + Send + Sync,
{
    async fn resolve(&self, identifier: &str) -> Result<String, ResolveError> {
        self(identifier)
    }
}
