//! Explicit side-effect control for batch write paths.

/// Side-effect switches threaded through every product save path.
///
/// Batch operations pass a context instead of toggling ambient global
/// flags: the bulk regenerator and the attribute generator suppress
/// recursive tag generation on the saves they themselves trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkContext {
    /// Skip the denormalized `product_cache` tag column write.
    pub suppress_search_cache: bool,

    /// Skip attribute-tag generation when a product is saved.
    pub suppress_generation: bool,
}

impl BulkContext {
    /// Context for saves issued from inside a bulk run.
    pub fn bulk() -> Self {
        Self {
            suppress_search_cache: false,
            suppress_generation: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_context_suppresses_nothing() {
        let ctx = BulkContext::default();
        assert!(!ctx.suppress_search_cache);
        assert!(!ctx.suppress_generation);
    }

    #[test]
    fn bulk_context_suppresses_generation() {
        let ctx = BulkContext::bulk();
        assert!(ctx.suppress_generation);
        assert!(!ctx.suppress_search_cache);
    }
}
