//! Environment configuration.

/// Configuration for an [`crate::Env`].
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Maximum bytes of keys plus values the environment may hold.
    pub map_size: usize,

    /// Maximum key size in bytes (also bounds duplicate values).
    pub max_key_size: usize,

    /// Maximum number of named tables.
    pub max_tables: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            map_size: 1024 * 1024 * 1024, // 1 GiB
            max_key_size: 511,
            max_tables: 128,
        }
    }
}

impl EnvConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the map size.
    #[must_use]
    pub const fn map_size(mut self, bytes: usize) -> Self {
        self.map_size = bytes;
        self
    }

    /// Sets the maximum key size.
    #[must_use]
    pub const fn max_key_size(mut self, bytes: usize) -> Self {
        self.max_key_size = bytes;
        self
    }

    /// Sets the maximum number of tables.
    #[must_use]
    pub const fn max_tables(mut self, count: usize) -> Self {
        self.max_tables = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EnvConfig::default();
        assert_eq!(config.max_key_size, 511);
        assert_eq!(config.max_tables, 128);
    }

    #[test]
    fn builder_pattern() {
        let config = EnvConfig::new().map_size(4096).max_tables(2);
        assert_eq!(config.map_size, 4096);
        assert_eq!(config.max_tables, 2);
    }
}
