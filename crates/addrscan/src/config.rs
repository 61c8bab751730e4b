//! Resolution settings.

/// Default size of a single memory read while scanning (4MB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Bytes read from the target per request
    pub chunk_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration for a [`ResolverRegistry`](crate::registry::ResolverRegistry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Resolve independent resolvers on the rayon thread pool
    pub parallel: bool,
    pub scan: ScanConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            parallel: cfg!(feature = "parallel"),
            scan: ScanConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Create a new configuration builder
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::default()
    }
}

/// Builder for RegistryConfig
#[derive(Debug, Clone, Default)]
pub struct RegistryConfigBuilder {
    parallel: Option<bool>,
    chunk_size: Option<usize>,
}

impl RegistryConfigBuilder {
    /// Run resolvers in parallel. Ignored without the `parallel` feature.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Set the per-read chunk size. Values of zero fall back to the default.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn build(self) -> RegistryConfig {
        let default = RegistryConfig::default();
        RegistryConfig {
            parallel: self.parallel.unwrap_or(default.parallel) && cfg!(feature = "parallel"),
            scan: ScanConfig {
                chunk_size: self
                    .chunk_size
                    .filter(|&size| size > 0)
                    .unwrap_or(default.scan.chunk_size),
            },
        }
    }
}
