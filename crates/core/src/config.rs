use anyhow::Context;
use chrono::NaiveTime;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub sentry_dsn: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub data_provider_base_url: Option<String>,
    pub data_provider_api_key: Option<String>,
    pub daily_store_dir: Option<String>,
    pub position_model_path: Option<String>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
            data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL").ok(),
            data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
            daily_store_dir: std::env::var("DAILY_STORE_DIR").ok(),
            position_model_path: std::env::var("POSITION_MODEL_PATH").ok(),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }

    pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
        self.data_provider_base_url
            .as_deref()
            .context("DATA_PROVIDER_BASE_URL is required")
    }

    pub fn daily_store_dir(&self) -> &str {
        self.daily_store_dir
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("data/daily_recommendations")
    }
}

/// Tunables for the recommendation engine. Built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound of the number pool (`1..=pool_max`).
    pub pool_max: u8,
    /// Numbers per set.
    pub pick_size: usize,

    /// Half-life (in draws) of the frequency decay. `None` counts raw occurrences.
    pub freq_decay_half_life: Option<u32>,
    /// Size of the "hot" set used by the confidence score.
    pub hot_top_k: usize,
    /// Recent draws scanned for the hot/cold split of the statistics report.
    pub hot_cold_window: usize,
    /// Candidates kept per position when sampling from a position distribution.
    pub refine_top_k: usize,
    /// Cap on non-consensus numbers taken from the union when merging.
    pub merge_max_union_fill: usize,

    pub enforce_odd_even: bool,
    pub enforce_range_coverage: bool,
    /// Longest allowed run of consecutive integers. `0` disables the check.
    pub max_consecutive: usize,
    /// Attempt budget for the odd/even and range coverage repairs.
    pub repair_attempts: usize,
    /// Attempt budget for the run-length repair.
    pub run_repair_attempts: usize,

    pub conf_base: f64,
    pub conf_min: f64,
    pub conf_max: f64,
    pub conf_w_consensus: f64,
    pub conf_w_hot: f64,
    pub conf_w_entropy: f64,
    /// Score attached to every set of a fast bundle.
    pub fast_confidence: f64,

    /// Seed the fast path from `(identity, day)` so retries reproduce the same sets.
    pub deterministic_seed: bool,
    /// Enqueue background refinement after a fast-path miss.
    pub enable_refinement: bool,

    pub default_sets: usize,
    pub max_sets: usize,

    /// Offset of the local calendar used for day keys and draw cutoffs.
    pub utc_offset_hours: i32,
    /// Local wall-clock time after which recommendations no longer count for that day's draw.
    pub draw_cutoff: NaiveTime,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_max: 45,
            pick_size: 6,
            freq_decay_half_life: Some(80),
            hot_top_k: 8,
            hot_cold_window: 40,
            refine_top_k: 8,
            merge_max_union_fill: 2,
            enforce_odd_even: true,
            enforce_range_coverage: true,
            max_consecutive: 2,
            repair_attempts: 10,
            run_repair_attempts: 20,
            conf_base: 0.40,
            conf_min: 0.40,
            conf_max: 0.80,
            conf_w_consensus: 0.30,
            conf_w_hot: 0.10,
            conf_w_entropy: 0.20,
            fast_confidence: 0.45,
            deterministic_seed: true,
            enable_refinement: true,
            default_sets: 5,
            max_sets: 10,
            utc_offset_hours: 9,
            draw_cutoff: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables. Unparseable values leave the default in place.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Some(n) = env_parse::<u32>("FREQ_DECAY_HALF_LIFE_DRAWS") {
            out.freq_decay_half_life = (n > 0).then_some(n);
        }
        override_from_env(&mut out.hot_top_k, "HOT_TOP_K");
        override_from_env(&mut out.hot_cold_window, "HOT_COLD_WINDOW");
        override_from_env(&mut out.refine_top_k, "REFINE_TOP_K");
        override_from_env(&mut out.merge_max_union_fill, "MERGE_MAX_UNION_FILL");
        if let Some(v) = env_bool("ENFORCE_ODD_EVEN_BALANCE") {
            out.enforce_odd_even = v;
        }
        if let Some(v) = env_bool("ENFORCE_RANGE_COVERAGE") {
            out.enforce_range_coverage = v;
        }
        override_from_env(&mut out.max_consecutive, "MAX_CONSECUTIVE");
        override_from_env(&mut out.repair_attempts, "REPAIR_ATTEMPTS");
        override_from_env(&mut out.run_repair_attempts, "RUN_REPAIR_ATTEMPTS");
        override_from_env(&mut out.conf_base, "CONF_BASE");
        override_from_env(&mut out.conf_min, "CONF_MIN");
        override_from_env(&mut out.conf_max, "CONF_MAX");
        override_from_env(&mut out.conf_w_consensus, "CONF_W_CONSENSUS");
        override_from_env(&mut out.conf_w_hot, "CONF_W_HOT");
        override_from_env(&mut out.conf_w_entropy, "CONF_W_ENTROPY");
        override_from_env(&mut out.fast_confidence, "FAST_CONFIDENCE");
        if let Some(v) = env_bool("DETERMINISTIC_SEED") {
            out.deterministic_seed = v;
        }
        if let Some(v) = env_bool("ENABLE_ML") {
            out.enable_refinement = v;
        }
        override_from_env(&mut out.default_sets, "DEFAULT_SETS");
        override_from_env(&mut out.max_sets, "MAX_SETS");
        override_from_env(&mut out.utc_offset_hours, "LOCAL_UTC_OFFSET_HOURS");
        if let Ok(s) = std::env::var("DRAW_CUTOFF_LOCAL") {
            if let Ok(t) = NaiveTime::parse_from_str(s.trim(), "%H:%M") {
                out.draw_cutoff = t;
            }
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.pick_size >= 1, "pick_size must be >= 1");
        anyhow::ensure!(self.pool_max >= 3, "pool_max must be >= 3 (got {})", self.pool_max);
        anyhow::ensure!(
            self.pick_size <= self.pool_max as usize,
            "pick_size ({}) must not exceed pool_max ({})",
            self.pick_size,
            self.pool_max
        );
        anyhow::ensure!(
            self.conf_min <= self.conf_max,
            "CONF_MIN ({}) must not exceed CONF_MAX ({})",
            self.conf_min,
            self.conf_max
        );
        anyhow::ensure!(
            (self.conf_min..=self.conf_max).contains(&self.fast_confidence),
            "FAST_CONFIDENCE ({}) must lie within CONF_MIN..=CONF_MAX ({}..={})",
            self.fast_confidence,
            self.conf_min,
            self.conf_max
        );
        anyhow::ensure!(self.refine_top_k >= 1, "REFINE_TOP_K must be >= 1");
        anyhow::ensure!(self.hot_cold_window >= 1, "HOT_COLD_WINDOW must be >= 1");
        anyhow::ensure!(
            (1..=self.max_sets).contains(&self.default_sets),
            "DEFAULT_SETS must be 1..=MAX_SETS (got {})",
            self.default_sets
        );
        anyhow::ensure!(
            (-12..=14).contains(&self.utc_offset_hours),
            "LOCAL_UTC_OFFSET_HOURS out of range: {}",
            self.utc_offset_hours
        );
        Ok(())
    }

    /// Resolves the requested set count, falling back to `default_sets`.
    pub fn resolve_set_count(&self, requested: Option<usize>) -> anyhow::Result<usize> {
        let n = requested.unwrap_or(self.default_sets);
        anyhow::ensure!(
            (1..=self.max_sets).contains(&n),
            "set count must be 1..={} (got {n})",
            self.max_sets
        );
        Ok(n)
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn override_from_env<T: std::str::FromStr>(slot: &mut T, name: &str) {
    if let Some(v) = env_parse::<T>(name) {
        *slot = v;
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    Some(matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    ))
}
