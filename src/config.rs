use std::time::Duration;

/// Tunables for the control loop. Defaults track the values the agent has
/// been run with in production flows; every one can be overridden through
/// `AUTOAPPLY_*` environment variables (loaded via dotenvy in the binary).
#[derive(Debug, Clone)]
pub struct Config {
    /// Hard cap on loop iterations before `BudgetExhausted`.
    pub max_steps: usize,
    /// Decision regenerations per step on hard failure or no-change.
    pub max_retries: usize,
    /// Sliding window for the stuck detector.
    pub stuck_window: chrono::Duration,
    /// Repeats of the same (signature, kind) within the window that count
    /// as stuck.
    pub stuck_threshold: u32,
    /// FIFO cap on persisted action records.
    pub record_cap: usize,
    /// Cap on remembered selectors per page signature.
    pub selector_cap: usize,
    /// Delay before capturing the "after" snapshot.
    pub settle_delay: Duration,
    /// Bound on element waits and the await-manual pause.
    pub wait_timeout: Duration,
    /// Timeout for the generation fallback call.
    pub generation_timeout: Duration,
    /// Proportion of the visible-text sample that must differ for a
    /// `Partial` verdict.
    pub text_change_ratio: f32,
    /// Empty required fields above this count trigger fill-form-fields.
    pub empty_required_threshold: usize,
    /// URL substrings that mark a confirmation page.
    pub confirmation_url_markers: Vec<String>,
    /// Title substrings that mark a confirmation page.
    pub confirmation_title_markers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_retries: 3,
            stuck_window: chrono::Duration::seconds(300),
            stuck_threshold: 3,
            record_cap: 200,
            selector_cap: 5,
            settle_delay: Duration::from_secs(2),
            wait_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
            text_change_ratio: 0.5,
            empty_required_threshold: 2,
            confirmation_url_markers: vec!["success".into(), "confirmation".into()],
            confirmation_title_markers: vec!["thank".into()],
        }
    }
}

impl Config {
    /// Defaults overlaid with any `AUTOAPPLY_*` environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<usize>("AUTOAPPLY_MAX_STEPS") {
            cfg.max_steps = v;
        }
        if let Some(v) = env_parse::<usize>("AUTOAPPLY_MAX_RETRIES") {
            cfg.max_retries = v;
        }
        if let Some(v) = env_parse::<i64>("AUTOAPPLY_STUCK_WINDOW_SECS") {
            cfg.stuck_window = chrono::Duration::seconds(v);
        }
        if let Some(v) = env_parse::<u32>("AUTOAPPLY_STUCK_THRESHOLD") {
            cfg.stuck_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("AUTOAPPLY_RECORD_CAP") {
            cfg.record_cap = v;
        }
        if let Some(v) = env_parse::<usize>("AUTOAPPLY_SELECTOR_CAP") {
            cfg.selector_cap = v;
        }
        if let Some(v) = env_parse::<u64>("AUTOAPPLY_SETTLE_MS") {
            cfg.settle_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("AUTOAPPLY_WAIT_TIMEOUT_MS") {
            cfg.wait_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("AUTOAPPLY_GENERATION_TIMEOUT_MS") {
            cfg.generation_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<f32>("AUTOAPPLY_TEXT_CHANGE_RATIO") {
            cfg.text_change_ratio = v;
        }
        if let Some(v) = env_parse::<usize>("AUTOAPPLY_EMPTY_REQUIRED_THRESHOLD") {
            cfg.empty_required_threshold = v;
        }
        if let Some(v) = env_list("AUTOAPPLY_CONFIRMATION_URL_MARKERS") {
            cfg.confirmation_url_markers = v;
        }
        if let Some(v) = env_list("AUTOAPPLY_CONFIRMATION_TITLE_MARKERS") {
            cfg.confirmation_title_markers = v;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Comma-separated list; markers are matched lowercase.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    // no other test reads these variables, so mutating the process
    // environment here is race-free
    #[test]
    fn env_overrides_apply() {
        std::env::set_var("AUTOAPPLY_TEXT_CHANGE_RATIO", "0.25");
        std::env::set_var("AUTOAPPLY_SELECTOR_CAP", "9");
        std::env::set_var("AUTOAPPLY_CONFIRMATION_URL_MARKERS", "Done, receipt");
        let cfg = Config::from_env();
        std::env::remove_var("AUTOAPPLY_TEXT_CHANGE_RATIO");
        std::env::remove_var("AUTOAPPLY_SELECTOR_CAP");
        std::env::remove_var("AUTOAPPLY_CONFIRMATION_URL_MARKERS");

        assert_eq!(cfg.text_change_ratio, 0.25);
        assert_eq!(cfg.selector_cap, 9);
        assert_eq!(cfg.confirmation_url_markers, ["done", "receipt"]);
        // untouched tunables keep their defaults
        assert_eq!(cfg.max_steps, 50);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        std::env::set_var("AUTOAPPLY_EMPTY_REQUIRED_THRESHOLD", "lots");
        let cfg = Config::from_env();
        std::env::remove_var("AUTOAPPLY_EMPTY_REQUIRED_THRESHOLD");
        assert_eq!(cfg.empty_required_threshold, 2);
    }
}
