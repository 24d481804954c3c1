//! Runtime configuration of a tree handle.

use eyre::{ensure, Result};

use super::constants::{DEFAULT_TRAIN_THRESHOLD, MAX_KEY_SIZE, MAX_TRAIN_SAMPLES};

/// Per-handle settings. Nothing here is persisted with the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Longest decoded key accepted by `add`, `try_get_value` and friends.
    pub max_key_size: usize,
    /// `nextTrainAt` given to a freshly created tree, and the floor for
    /// every later retraining threshold.
    pub train_threshold: u64,
    /// Cap on retraining samples.
    pub max_train_samples: usize,
    /// Recompute page free space after every page mutation.
    pub verify_pages: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_key_size: MAX_KEY_SIZE,
            train_threshold: DEFAULT_TRAIN_THRESHOLD,
            max_train_samples: MAX_TRAIN_SAMPLES,
            verify_pages: cfg!(debug_assertions),
        }
    }
}

impl TreeConfig {
    pub fn with_max_key_size(mut self, max_key_size: usize) -> Self {
        self.max_key_size = max_key_size;
        self
    }

    pub fn with_train_threshold(mut self, train_threshold: u64) -> Self {
        self.train_threshold = train_threshold;
        self
    }

    pub fn with_max_train_samples(mut self, max_train_samples: usize) -> Self {
        self.max_train_samples = max_train_samples;
        self
    }

    pub fn with_verify_pages(mut self, verify_pages: bool) -> Self {
        self.verify_pages = verify_pages;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_key_size > 0 && self.max_key_size <= MAX_KEY_SIZE,
            "max_key_size {} must be in 1..={}",
            self.max_key_size,
            MAX_KEY_SIZE
        );
        ensure!(
            self.max_train_samples > 0 && self.max_train_samples <= MAX_TRAIN_SAMPLES,
            "max_train_samples {} must be in 1..={}",
            self.max_train_samples,
            MAX_TRAIN_SAMPLES
        );
        ensure!(self.train_threshold > 0, "train_threshold must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TreeConfig::default().validate().unwrap();
    }

    #[test]
    fn oversized_key_limit_is_rejected() {
        let config = TreeConfig::default().with_max_key_size(MAX_KEY_SIZE + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_samples_is_rejected() {
        let config = TreeConfig::default().with_max_train_samples(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let config = TreeConfig::default()
            .with_max_key_size(64)
            .with_train_threshold(500)
            .with_verify_pages(true);
        assert_eq!(config.max_key_size, 64);
        assert_eq!(config.train_threshold, 500);
        assert!(config.verify_pages);
    }
}
