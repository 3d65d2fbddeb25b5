//! Runner configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Stack used when a caller does not name one.
pub const DEFAULT_STACK: &str = "default";

/// Image used for stacks without an explicit mapping.
pub const DEFAULT_IMAGE: &str = "alpine";

/// Attempts a task may make before it is quarantined.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Largest file, in bytes, sent to the judgment backend.
pub const DEFAULT_EVAL_SIZE_LIMIT: u64 = 1024 * 1024;

/// Configuration shared by the runner components.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How often the idle monitor sweeps the pool.
    pub monitor_interval: Duration,
    /// How long a sandbox may sit unused before it is evicted.
    pub idle_timeout: Duration,
    /// Stack used by `execute` and by gates run without an explicit stack.
    pub default_stack: String,
    /// Image used for stacks missing from `stack_images`.
    pub default_image: String,
    /// Per-stack image overrides.
    pub stack_images: HashMap<String, String>,
    /// Command that keeps a sandbox alive between execs.
    pub sandbox_cmd: Vec<String>,
    /// File size ceiling for snapshot evaluation.
    pub eval_size_limit: u64,
    /// Attempt ceiling for the circuit breaker.
    pub max_attempts: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
            default_stack: DEFAULT_STACK.to_string(),
            default_image: DEFAULT_IMAGE.to_string(),
            stack_images: HashMap::new(),
            sandbox_cmd: vec!["sleep".to_string(), "infinity".to_string()],
            eval_size_limit: DEFAULT_EVAL_SIZE_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RunnerConfig {
    /// Sets the monitor sweep interval.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the default stack.
    pub fn with_default_stack(mut self, stack: impl Into<String>) -> Self {
        self.default_stack = stack.into();
        self
    }

    /// Sets the fallback image.
    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    /// Maps a stack to a specific image.
    pub fn with_stack_image(mut self, stack: impl Into<String>, image: impl Into<String>) -> Self {
        self.stack_images.insert(stack.into(), image.into());
        self
    }

    /// Sets the snapshot evaluation size ceiling.
    pub fn with_eval_size_limit(mut self, limit: u64) -> Self {
        self.eval_size_limit = limit;
        self
    }

    /// Sets the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Image to create sandboxes of `stack` from.
    pub fn image_for_stack(&self, stack: &str) -> &str {
        self.stack_images
            .get(stack)
            .map(String::as_str)
            .unwrap_or(&self.default_image)
    }

    /// Parses `stack=image` pairs, as given on the command line.
    pub fn parse_stack_images<'a>(
        pairs: impl IntoIterator<Item = &'a str>,
    ) -> Result<HashMap<String, String>, String> {
        pairs
            .into_iter()
            .map(|pair| match pair.split_once('=') {
                Some((stack, image)) if !stack.is_empty() && !image.is_empty() => {
                    Ok((stack.to_string(), image.to_string()))
                }
                _ => Err(format!("invalid stack image mapping '{pair}': expected STACK=IMAGE")),
            })
            .collect()
    }
}
