//! Interpreter Configuration
//!
//! Region and stack capacities plus the writer's node quota. Values can
//! come from a TOML file (`--config skim.toml`), with command-line flags
//! taking precedence over both the file and the defaults.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Capacity of the pair-cell region.
    pub pair_cells: usize,
    /// Capacity of the data-block region, in bytes.
    pub block_bytes: usize,
    /// Pointer-stack slots (shared with the pinned-roots region).
    pub stack_slots: usize,
    /// Label-stack slots.
    pub label_slots: usize,
    /// Writer node quota; bounds output on cyclic structures.
    pub write_quota: usize,
    /// Whether special forms are validated before evaluation.
    pub syntax_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pair_cells: 65_536,
            block_bytes: 256 * 1024,
            stack_slots: 4096,
            label_slots: 8192,
            write_quota: 200,
            syntax_check: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("bad config {}: {e}", path.display()))
    }
}
