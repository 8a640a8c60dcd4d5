//! Upload batch configuration.

use std::time::Duration;

use crate::progress::DEFAULT_PROGRESS_INTERVAL;

/// Settings for one upload batch.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Requested worker count; clamped to `[1, task_count]` at run time.
    pub concurrency: usize,
    /// Skip the duplicate lookup and upload unconditionally.
    pub force_upload: bool,
    /// Delete the local file after a successful upload or duplicate hit.
    pub delete_after_upload: bool,
    /// Descend into subdirectories while scanning.
    pub recursive: bool,
    /// Drop files whose extension the remote library does not accept.
    pub filter_unsupported: bool,
    /// Minimum gap between forwarded progress reports.
    pub progress_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            force_upload: false,
            delete_after_upload: false,
            recursive: false,
            filter_unsupported: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl UploadConfig {
    /// Effective worker count for `task_count` tasks: at least 1,
    /// never more than the number of tasks.
    pub fn clamped_concurrency(&self, task_count: usize) -> usize {
        self.concurrency.max(1).min(task_count.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_clamps_to_task_count() {
        let config = UploadConfig {
            concurrency: 8,
            ..UploadConfig::default()
        };
        assert_eq!(config.clamped_concurrency(3), 3);
        assert_eq!(config.clamped_concurrency(8), 8);
        assert_eq!(config.clamped_concurrency(100), 8);
    }

    #[test]
    fn zero_concurrency_becomes_one() {
        let config = UploadConfig {
            concurrency: 0,
            ..UploadConfig::default()
        };
        assert_eq!(config.clamped_concurrency(5), 1);
        assert_eq!(config.clamped_concurrency(0), 1);
    }
}
