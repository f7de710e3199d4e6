//! Specialization configuration.
//!
//! An immutable snapshot taken once at startup and passed by reference to
//! every component that needs it. Tests construct alternate configurations
//! through the builder; production reads the process environment the way
//! the rest of the Selva runtime does. Nothing here may change after the
//! first specializable call executes.

use once_cell::sync::Lazy;

use crate::defaults;

static GLOBAL: Lazy<SpecConfig> = Lazy::new(SpecConfig::from_env);

/// Where diagnostic events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkDest {
    /// No diagnostics (the default).
    Disabled,
    /// Write to standard error.
    Stderr,
    /// Write to a file; a single `%d` in the path expands to the pid.
    File(String),
}

/// Immutable, process-wide specialization settings.
#[derive(Debug, Clone)]
pub struct SpecConfig {
    /// Master switch. When false, logging entry points are no-ops and no
    /// worker is started.
    pub enabled: bool,
    /// Whether the worker records inlining candidates.
    pub inline_enabled: bool,
    /// Whether on-stack replacement entries are emitted.
    pub osr_enabled: bool,
    /// Skip warm-up thresholds; used to flush out specializer bugs.
    pub no_delay: bool,
    /// Cap on successful installs; the worker drains without producing once
    /// reached. `Some(0)` installs nothing at all. Bisection aid.
    pub limit: Option<u32>,
    /// Entries per log buffer.
    pub log_capacity: usize,
    /// Legacy cap on logged runs per frame.
    pub max_log_runs: u32,
    /// Capacity of the worker's inbound queue.
    pub queue_capacity: usize,
    /// Diagnostic sink destination.
    pub events: SinkDest,
    /// Cross-thread write logging is active (raises the instrumentation
    /// level once at startup).
    pub cross_thread_write_log: bool,
    /// Coverage logging is active (raises the instrumentation level once
    /// at startup).
    pub coverage_log: bool,
}

impl SpecConfig {
    /// Start building a configuration; defaults match a plain production
    /// run with specialization on and diagnostics off.
    pub fn builder() -> SpecConfigBuilder {
        SpecConfigBuilder::default()
    }

    /// Read the configuration from the process environment.
    ///
    /// Understood variables, all following runtime conventions (a set,
    /// non-empty value enables the `*_DISABLE`/`NODELAY` switches):
    /// `SELVA_SPEC_DISABLE`, `SELVA_SPEC_INLINE_DISABLE`,
    /// `SELVA_SPEC_OSR_DISABLE`, `SELVA_SPEC_NODELAY`, `SELVA_SPEC_LIMIT`,
    /// `SELVA_SPEC_LOG`, `SELVA_CROSS_THREAD_WRITE_LOG`,
    /// `SELVA_COVERAGE_LOG`.
    pub fn from_env() -> Self {
        let mut builder = Self::builder()
            .enabled(!env_nonempty("SELVA_SPEC_DISABLE"))
            .inline(!env_nonempty("SELVA_SPEC_INLINE_DISABLE"))
            .osr(!env_nonempty("SELVA_SPEC_OSR_DISABLE"))
            .no_delay(env_nonempty("SELVA_SPEC_NODELAY"))
            .cross_thread_write_log(std::env::var_os("SELVA_CROSS_THREAD_WRITE_LOG").is_some())
            .coverage_log(std::env::var_os("SELVA_COVERAGE_LOG").is_some());

        if let Some(limit) = env_value("SELVA_SPEC_LIMIT").and_then(|v| v.parse().ok()) {
            builder = builder.limit(Some(limit));
        }
        if let Some(path) = env_value("SELVA_SPEC_LOG") {
            builder = builder.events(SinkDest::File(path));
        }
        builder.build()
    }

    /// The process-wide configuration, read from the environment on first
    /// access and frozen for the lifetime of the process.
    pub fn global() -> &'static SpecConfig {
        &GLOBAL
    }

    /// Observation count a site needs before it is guarded.
    pub fn site_hit_threshold(&self) -> u32 {
        if self.no_delay {
            1
        } else {
            defaults::MIN_SITE_HITS
        }
    }
}

fn env_nonempty(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Builder for [`SpecConfig`].
#[derive(Debug, Clone)]
pub struct SpecConfigBuilder {
    enabled: bool,
    inline_enabled: bool,
    osr_enabled: bool,
    no_delay: bool,
    limit: Option<u32>,
    log_capacity: usize,
    max_log_runs: u32,
    queue_capacity: usize,
    events: SinkDest,
    cross_thread_write_log: bool,
    coverage_log: bool,
}

impl Default for SpecConfigBuilder {
    fn default() -> Self {
        SpecConfigBuilder {
            enabled: true,
            inline_enabled: true,
            osr_enabled: true,
            no_delay: false,
            limit: None,
            log_capacity: defaults::LOG_DEFAULT_ENTRIES,
            max_log_runs: defaults::LOG_MAX_RUNS,
            queue_capacity: defaults::WORKER_QUEUE_CAPACITY,
            events: SinkDest::Disabled,
            cross_thread_write_log: false,
            coverage_log: false,
        }
    }
}

impl SpecConfigBuilder {
    /// Master switch.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Inlining candidates on or off.
    pub fn inline(mut self, enabled: bool) -> Self {
        self.inline_enabled = enabled;
        self
    }

    /// On-stack replacement on or off.
    pub fn osr(mut self, enabled: bool) -> Self {
        self.osr_enabled = enabled;
        self
    }

    /// Skip warm-up thresholds.
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    /// Cap on successful installs.
    pub fn limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    /// Entries per log buffer.
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Legacy cap on logged runs per frame.
    pub fn max_log_runs(mut self, runs: u32) -> Self {
        self.max_log_runs = runs;
        self
    }

    /// Capacity of the worker's inbound queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Diagnostic sink destination.
    pub fn events(mut self, dest: SinkDest) -> Self {
        self.events = dest;
        self
    }

    /// Cross-thread write logging mode.
    pub fn cross_thread_write_log(mut self, enabled: bool) -> Self {
        self.cross_thread_write_log = enabled;
        self
    }

    /// Coverage logging mode.
    pub fn coverage_log(mut self, enabled: bool) -> Self {
        self.coverage_log = enabled;
        self
    }

    /// Finalize, applying the fixed precedence policy: disabling
    /// specialization disables inlining and OSR too. Conflicting toggles
    /// are resolved here, never surfaced as errors.
    pub fn build(self) -> SpecConfig {
        let enabled = self.enabled;
        SpecConfig {
            enabled,
            inline_enabled: enabled && self.inline_enabled,
            osr_enabled: enabled && self.osr_enabled,
            no_delay: self.no_delay,
            limit: self.limit,
            log_capacity: self.log_capacity.max(1),
            max_log_runs: self.max_log_runs,
            queue_capacity: self.queue_capacity.max(1),
            events: self.events,
            cross_thread_write_log: self.cross_thread_write_log,
            coverage_log: self.coverage_log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build() {
        let config = SpecConfig::builder().build();
        assert!(config.enabled);
        assert!(config.inline_enabled);
        assert!(config.osr_enabled);
        assert!(!config.no_delay);
        assert_eq!(config.limit, None);
        assert_eq!(config.log_capacity, defaults::LOG_DEFAULT_ENTRIES);
        assert_eq!(config.max_log_runs, defaults::LOG_MAX_RUNS);
        assert_eq!(config.events, SinkDest::Disabled);
    }

    #[test]
    fn test_disable_precedence() {
        // Disabling specialization wins over explicitly enabled inlining
        // and OSR; never an error.
        let config = SpecConfig::builder()
            .enabled(false)
            .inline(true)
            .osr(true)
            .build();
        assert!(!config.enabled);
        assert!(!config.inline_enabled);
        assert!(!config.osr_enabled);
    }

    #[test]
    fn test_hit_threshold_respects_no_delay() {
        let warm = SpecConfig::builder().build();
        let eager = SpecConfig::builder().no_delay(true).build();
        assert_eq!(warm.site_hit_threshold(), defaults::MIN_SITE_HITS);
        assert_eq!(eager.site_hit_threshold(), 1);
    }

    #[test]
    fn test_zero_capacities_clamped() {
        let config = SpecConfig::builder()
            .log_capacity(0)
            .queue_capacity(0)
            .build();
        assert_eq!(config.log_capacity, 1);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_global_snapshot_is_frozen() {
        // The snapshot is taken once; later calls return the same value,
        // regardless of environment changes in between.
        let first = SpecConfig::global();
        let second = SpecConfig::global();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_from_env_round_trip() {
        // Variables are only touched by this one test to avoid races with
        // the parallel test runner.
        std::env::set_var("SELVA_SPEC_INLINE_DISABLE", "1");
        std::env::set_var("SELVA_SPEC_NODELAY", "1");
        std::env::set_var("SELVA_SPEC_LIMIT", "25");
        std::env::set_var("SELVA_SPEC_LOG", "spec-%d.log");

        let config = SpecConfig::from_env();
        assert!(config.enabled);
        assert!(!config.inline_enabled);
        assert!(config.osr_enabled);
        assert!(config.no_delay);
        assert_eq!(config.limit, Some(25));
        assert_eq!(config.events, SinkDest::File("spec-%d.log".to_string()));

        std::env::remove_var("SELVA_SPEC_INLINE_DISABLE");
        std::env::remove_var("SELVA_SPEC_NODELAY");
        std::env::remove_var("SELVA_SPEC_LIMIT");
        std::env::remove_var("SELVA_SPEC_LOG");
    }
}
