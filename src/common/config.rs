use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::layout_engine::Direction;

pub fn data_dir() -> PathBuf { dirs::home_dir().unwrap_or_default().join(".treeplace") }
pub fn layouts_file() -> PathBuf { data_dir().join("layouts.ron") }
pub fn config_file() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".config").join("treeplace").join("config.toml")
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub layout: LayoutSettings,
    #[serde(default)]
    pub stacking: StackingSettings,
    #[serde(default)]
    pub interaction: InteractionSettings,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct LayoutSettings {
    /// Direction in which ranks grow away from their roots.
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub spacing: SpacingTiers,
    /// Free subgraphs with more nodes than this use the medium tier.
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: usize,
    /// Free subgraphs with more nodes than this use the large tier.
    #[serde(default = "default_large_threshold")]
    pub large_threshold: usize,
    /// Along-axis distance between a parent and children revealed by an
    /// expand. Falls back to the tight rank spacing.
    #[serde(default)]
    pub fanout_offset: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct Spacing {
    /// Minimum cross-axis distance between adjacent siblings.
    pub sibling: f64,
    /// Along-axis distance between consecutive ranks.
    pub rank: f64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct SpacingTiers {
    #[serde(default = "default_tight_spacing")]
    pub tight: Spacing,
    #[serde(default = "default_medium_spacing")]
    pub medium: Spacing,
    #[serde(default = "default_large_spacing")]
    pub large: Spacing,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct StackingSettings {
    /// Edge length of the square grid cells positions are bucketed into.
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    /// A layout is stacked when distinct cells < node count * this ratio.
    #[serde(default = "default_min_distinct_ratio")]
    pub min_distinct_ratio: f64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct InteractionSettings {
    /// Drags that end closer than this to their start are treated as clicks.
    #[serde(default = "default_drag_epsilon")]
    pub drag_epsilon: f64,
    /// How long reconciliation stays suppressed after a drag ends.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Quiet period before a viewport change is committed.
    #[serde(default = "default_viewport_debounce_ms")]
    pub viewport_debounce_ms: u64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            direction: Direction::default(),
            spacing: SpacingTiers::default(),
            medium_threshold: default_medium_threshold(),
            large_threshold: default_large_threshold(),
            fanout_offset: None,
        }
    }
}

impl Default for SpacingTiers {
    fn default() -> Self {
        Self {
            tight: default_tight_spacing(),
            medium: default_medium_spacing(),
            large: default_large_spacing(),
        }
    }
}

impl Default for StackingSettings {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            min_distinct_ratio: default_min_distinct_ratio(),
        }
    }
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            drag_epsilon: default_drag_epsilon(),
            settle_delay_ms: default_settle_delay_ms(),
            viewport_debounce_ms: default_viewport_debounce_ms(),
        }
    }
}

impl LayoutSettings {
    /// Spacing tier for a free subgraph of `free_count` nodes.
    pub fn spacing_for(&self, free_count: usize) -> Spacing {
        if free_count > self.large_threshold {
            self.spacing.large
        } else if free_count > self.medium_threshold {
            self.spacing.medium
        } else {
            self.spacing.tight
        }
    }

    pub fn fanout_offset(&self) -> f64 { self.fanout_offset.unwrap_or(self.spacing.tight.rank) }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (name, spacing) in [
            ("tight", &self.spacing.tight),
            ("medium", &self.spacing.medium),
            ("large", &self.spacing.large),
        ] {
            issues.extend(spacing.validate().into_iter().map(|i| format!("spacing.{name}.{i}")));
        }

        if self.large_threshold < self.medium_threshold {
            issues.push(format!(
                "large_threshold ({}) must not be below medium_threshold ({})",
                self.large_threshold, self.medium_threshold
            ));
        }

        match self.fanout_offset {
            Some(offset) if offset <= 0.0 => {
                issues.push(format!("fanout_offset must be positive, got {offset}"));
            }
            _ => {}
        }

        issues
    }
}

impl Spacing {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.sibling <= 0.0 {
            issues.push(format!("sibling must be positive, got {}", self.sibling));
        }
        if self.rank <= 0.0 {
            issues.push(format!("rank must be positive, got {}", self.rank));
        }

        issues
    }
}

impl StackingSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.cell_size <= 0.0 {
            issues.push(format!("cell_size must be positive, got {}", self.cell_size));
        }
        if !(self.min_distinct_ratio > 0.0 && self.min_distinct_ratio <= 1.0) {
            issues.push(format!(
                "min_distinct_ratio must be in (0, 1], got {}",
                self.min_distinct_ratio
            ));
        }

        issues
    }
}

impl InteractionSettings {
    pub fn settle_delay(&self) -> Duration { Duration::from_millis(self.settle_delay_ms) }

    pub fn viewport_debounce(&self) -> Duration { Duration::from_millis(self.viewport_debounce_ms) }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.drag_epsilon < 0.0 {
            issues.push(format!(
                "drag_epsilon must be non-negative, got {}",
                self.drag_epsilon
            ));
        }

        issues
    }
}

fn default_medium_threshold() -> usize { 20 }
fn default_large_threshold() -> usize { 50 }

fn default_tight_spacing() -> Spacing { Spacing { sibling: 80.0, rank: 60.0 } }
fn default_medium_spacing() -> Spacing { Spacing { sibling: 120.0, rank: 90.0 } }
fn default_large_spacing() -> Spacing { Spacing { sibling: 160.0, rank: 120.0 } }

fn default_cell_size() -> f64 { 50.0 }
fn default_min_distinct_ratio() -> f64 { 0.5 }

fn default_drag_epsilon() -> f64 { 0.5 }
fn default_settle_delay_ms() -> u64 { 200 }
fn default_viewport_debounce_ms() -> u64 { 100 }

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    /// Reads `path` when it exists, otherwise falls back to the defaults.
    pub fn read_or_default(path: &Path) -> anyhow::Result<Config> {
        if path.exists() { Self::read(path) } else { Ok(Config::default()) }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    /// Validates the entire configuration and returns a list of issues found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        issues.extend(self.layout.validate().into_iter().map(|i| format!("layout.{i}")));
        issues.extend(self.stacking.validate().into_iter().map(|i| format!("stacking.{i}")));
        issues.extend(self.interaction.validate().into_iter().map(|i| format!("interaction.{i}")));

        issues
    }

    fn parse(buf: &str) -> anyhow::Result<Config> {
        match toml::from_str::<Config>(buf) {
            Ok(c) => Ok(c),
            Err(e) => {
                let msg = e.to_string();
                match Self::extract_unknown_token(&msg)
                    .and_then(|(unknown, candidates)| Self::suggest_similar(&unknown, &candidates))
                {
                    Some(suggestion) => bail!("{msg}\nDid you mean `{suggestion}`?"),
                    None => bail!("{msg}"),
                }
            }
        }
    }

    /// no need to pull in a dep for just this
    fn levenshtein(a: &str, b: &str) -> usize {
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        let mut d = vec![vec![0usize; b_chars.len() + 1]; a_chars.len() + 1];
        for (i, row) in d.iter_mut().enumerate() {
            row[0] = i;
        }
        for j in 0..=b_chars.len() {
            d[0][j] = j;
        }
        for i in 1..=a_chars.len() {
            for j in 1..=b_chars.len() {
                let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
                d[i][j] = std::cmp::min(
                    std::cmp::min(d[i - 1][j] + 1, d[i][j - 1] + 1),
                    d[i - 1][j - 1] + cost,
                );
            }
        }
        d[a_chars.len()][b_chars.len()]
    }

    // Pulls the offending token out of serde's "unknown field `x`, expected ..."
    // or "unknown variant `x`, expected ..." messages, along with every other
    // backtick-quoted token as a candidate.
    fn extract_unknown_token(err: &str) -> Option<(String, Vec<String>)> {
        let start = ["unknown field `", "unknown variant `"]
            .iter()
            .find_map(|needle| err.find(needle).map(|pos| pos + needle.len()))?;
        let end = err[start..].find('`')?;
        let unknown = err[start..start + end].to_string();

        let mut candidates = Vec::new();
        let mut rest = &err[start + end + 1..];
        while let Some(open) = rest.find('`') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('`') else { break };
            let token = &after[..close];
            if token != unknown && !candidates.iter().any(|c| c == token) {
                candidates.push(token.to_string());
            }
            rest = &after[close + 1..];
        }
        Some((unknown, candidates))
    }

    fn suggest_similar(unknown: &str, candidates: &[String]) -> Option<String> {
        let unknown = unknown.to_lowercase();
        let (best, dist) = candidates
            .iter()
            .map(|c| (c, Self::levenshtein(&unknown, &c.to_lowercase())))
            .min_by_key(|(_, dist)| *dist)?;
        // Heuristic threshold: allow suggestions if distance is <= half the length (or <=3).
        let threshold = std::cmp::max(3usize, best.len() / 2);
        (dist <= threshold).then(|| best.clone())
    }
}
