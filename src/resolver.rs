use std::collections::HashMap;

use async_trait::async_trait;

use crate::{error::ResolveError, traits::Resolver};

/// Resolves identifiers from a fixed table, as loaded from the
/// `[recipients]` section of the configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    table: HashMap<String, String>,
}

impl StaticResolver {
    #[must_use]
    pub const fn new(table: HashMap<String, String>) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, identifier: &str) -> Result<String, ResolveError> {
        self.table
            .get(identifier)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(identifier.to_string()))
    }
}
