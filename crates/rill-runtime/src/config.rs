/// Knobs for a single compile run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileConfig {
    /// Keep the last top-level scope open until the next one opens or the run ends.
    pub extend_last_top_level_scope: bool,
    /// Upper bound on interpreted instructions; `None` is unbounded.
    pub fuel: Option<u64>,
}

impl CompileConfig {
    /// Reads `RILL_EXTEND_TOP_LEVEL_SCOPE=1` and `RILL_FUEL=<n>`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        CompileConfig {
            extend_last_top_level_scope: lookup("RILL_EXTEND_TOP_LEVEL_SCOPE")
                .is_some_and(|v| v == "1"),
            fuel: lookup("RILL_FUEL").and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn with_extended_top_level_scope(mut self, extend: bool) -> Self {
        self.extend_last_top_level_scope = extend;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::CompileConfig;

    #[test]
    fn lookup_parses_known_keys() {
        let config = CompileConfig::from_lookup(|key| match key {
            "RILL_EXTEND_TOP_LEVEL_SCOPE" => Some("1".into()),
            "RILL_FUEL" => Some(" 500 ".into()),
            _ => None,
        });
        assert_eq!(
            config,
            CompileConfig::default()
                .with_extended_top_level_scope(true)
                .with_fuel(500)
        );
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let config = CompileConfig::from_lookup(|key| match key {
            "RILL_EXTEND_TOP_LEVEL_SCOPE" => Some("yes".into()),
            "RILL_FUEL" => Some("lots".into()),
            _ => None,
        });
        assert_eq!(config, CompileConfig::default());
    }
}
