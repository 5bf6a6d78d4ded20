use std::collections::HashMap;

/// Run-scoped output map with dual addressing.
///
/// Every completed node's output is stored under its node id and under the
/// positional alias `step_<index>` (index = position in the execution
/// order), so downstream references may use either form. Keys are written
/// once per node and never mutated afterward.
#[derive(Debug, Default)]
pub struct RunContext {
    values: HashMap<String, serde_json::Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node's output under both its id and its positional alias.
    pub fn record(&mut self, node_id: &str, index: usize, output: serde_json::Value) {
        self.values.insert(node_id.to_string(), output.clone());
        self.values.insert(format!("step_{}", index), output);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// All `step_*` aliases except `exclude`, in no particular order.
    pub fn step_entries<'a>(
        &'a self,
        exclude: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a serde_json::Value)> + 'a {
        self.values
            .iter()
            .filter(move |(k, _)| k.starts_with("step_") && k.as_str() != exclude)
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Snapshot consumed by the gateway and the final result.
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.values.clone()
    }

    pub fn into_values(self) -> HashMap<String, serde_json::Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dual_addressing_resolves_to_identical_value() {
        let mut ctx = RunContext::new();
        ctx.record("fetch", 0, json!({"items": [1, 2, 3]}));

        assert_eq!(ctx.get("fetch"), ctx.get("step_0"));
        assert_eq!(ctx.get("fetch").unwrap()["items"][1], json!(2));
    }

    #[test]
    fn test_step_entries_excludes_requested_alias() {
        let mut ctx = RunContext::new();
        ctx.record("a", 0, json!("first"));
        ctx.record("b", 1, json!("second"));

        let keys: Vec<&str> = ctx.step_entries("step_0").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["step_1"]);
    }

    #[test]
    fn test_snapshot_contains_both_aliases() {
        let mut ctx = RunContext::new();
        ctx.record("a", 0, json!(42));
        let snapshot = ctx.snapshot();
        assert_eq!(snapshot["a"], json!(42));
        assert_eq!(snapshot["step_0"], json!(42));
    }
}
