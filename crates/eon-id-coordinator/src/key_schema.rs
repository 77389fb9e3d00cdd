//! Key naming for the shared store.
//!
//! `<prefix>dc:<dc>:worker:<wid>` holds the worker record, `<prefix>dc:<dc>:counter`
//! drives dynamic allocation, and `<prefix>registry` is an informational set
//! of `"<dc>:<wid>"` members.

pub const DEFAULT_PREFIX: &str = "eon-id:";

/// Normalizes a key prefix so it can be concatenated directly with
/// `dc:<n>:...` / `registry` without a separator. An empty prefix becomes
/// the default; any other prefix is suffixed with `:` unless it already
/// ends in `:` or `_`.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }
    if prefix.ends_with(':') || prefix.ends_with('_') {
        prefix.to_string()
    } else {
        format!("{prefix}:")
    }
}

#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn worker_key(&self, datacenter_id: i64, worker_id: i64) -> String {
        format!("{}dc:{datacenter_id}:worker:{worker_id}", self.prefix)
    }

    pub fn counter_key(&self, datacenter_id: i64) -> String {
        format!("{}dc:{datacenter_id}:counter", self.prefix)
    }

    pub fn registry_key(&self) -> String {
        format!("{}registry", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_becomes_default() {
        assert_eq!(normalize_prefix(""), "eon-id:");
    }

    #[test]
    fn already_colon_terminated_prefix_is_untouched() {
        assert_eq!(normalize_prefix("lynx:eon-id:"), "lynx:eon-id:");
    }

    #[test]
    fn bare_prefix_gets_colon_suffix() {
        assert_eq!(normalize_prefix("lynx:eon-id:worker"), "lynx:eon-id:worker:");
    }

    #[test]
    fn underscore_terminated_prefix_is_untouched() {
        assert_eq!(normalize_prefix("lynx_eon_id_"), "lynx_eon_id_");
    }

    #[test]
    fn normalization_is_idempotent() {
        for p in ["", "a", "a:", "a_", "a:b:"] {
            let once = normalize_prefix(p);
            let twice = normalize_prefix(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn key_builders_match_schema() {
        let schema = KeySchema::new("eon-id:");
        assert_eq!(schema.worker_key(1, 2), "eon-id:dc:1:worker:2");
        assert_eq!(schema.counter_key(1), "eon-id:dc:1:counter");
        assert_eq!(schema.registry_key(), "eon-id:registry");
    }
}
