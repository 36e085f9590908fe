//! Rule-store JSON persistence (§4.11: "rules persist across restarts via
//! JSON serialization").

use std::fs;
use std::path::Path;

use veritas_core::error::{KernelError, KernelResult};
use veritas_core::rule::HealingRule;
use veritas_defense::RuleTable;

/// Writes every rule currently in `table` to `path` as a JSON array.
pub fn save_rules(table: &RuleTable, path: impl AsRef<Path>) -> KernelResult<()> {
    let rules: Vec<HealingRule> = table.snapshot().as_ref().clone();
    let json = serde_json::to_string_pretty(&rules)?;
    fs::write(path, json)?;
    Ok(())
}

/// Loads a [`RuleTable`] from a previously saved JSON array; an absent file
/// is treated as an empty table rather than an error, since a fresh kernel
/// has never persisted anything yet.
pub fn load_rules(path: impl AsRef<Path>) -> KernelResult<RuleTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(RuleTable::new());
    }
    let raw = fs::read_to_string(path)?;
    let rules: Vec<HealingRule> = serde_json::from_str(&raw).map_err(KernelError::from)?;
    Ok(RuleTable::from_rules(rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use veritas_core::traits::RuleStore;

    #[test]
    fn missing_file_loads_as_empty_table() {
        let dir = tempdir().unwrap();
        let table = load_rules(dir.path().join("rules.json")).unwrap();
        assert!(table.active_rules().is_empty());
    }

    #[test]
    fn round_trips_injected_rules_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let table = RuleTable::new();
        table.inject_rule(HealingRule::new("dos", "nested-loop")).unwrap();
        save_rules(&table, &path).unwrap();

        let reloaded = load_rules(&path).unwrap();
        assert_eq!(reloaded.active_rules().len(), 1);
        assert_eq!(reloaded.active_rules()[0].attack_type, "dos");
    }
}
