//! Table routing
//!
//! Each candidate object goes to the table of the first enabled pattern that
//! matches its key, or to the default table. Routing is pure: no I/O, and the
//! same input always yields the same table order and object order.

use std::collections::BTreeMap;

use crate::config::{FilePattern, ProcessingMode};
use crate::core::catalog::CandidateObject;
use crate::core::pattern::CompiledPattern;
use crate::error::Result;

/// Limits the matched pattern places on an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferPolicy {
    /// Largest accepted size in bytes (0 = unlimited)
    pub max_file_size: u64,
    pub processing_mode: ProcessingMode,
}

impl TransferPolicy {
    /// Whether `size` is over the ceiling. A size equal to the ceiling is allowed.
    pub fn exceeds_ceiling(&self, size: u64) -> bool {
        self.max_file_size > 0 && size > self.max_file_size
    }
}

/// An object together with the policy of the rule that claimed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedObject {
    pub object: CandidateObject,
    pub policy: TransferPolicy,
}

/// Table name to its objects, both in sorted order
pub type RoutingTable = BTreeMap<String, Vec<RoutedObject>>;

#[derive(Debug, Clone)]
struct Rule {
    matcher: CompiledPattern,
    table: String,
    policy: TransferPolicy,
}

/// Compiled routing rules
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<Rule>,
    default_table: String,
}

impl Router {
    /// Compile the enabled patterns. Disabled patterns are dropped here and
    /// never considered again.
    pub fn new(patterns: &[FilePattern], default_table: impl Into<String>) -> Result<Self> {
        let mut rules = Vec::new();
        for pattern in patterns.iter().filter(|p| p.enabled) {
            rules.push(Rule {
                matcher: CompiledPattern::new(&pattern.pattern)?,
                table: pattern.target_table.clone(),
                policy: TransferPolicy {
                    max_file_size: pattern.max_file_size,
                    processing_mode: pattern.processing_mode,
                },
            });
        }

        Ok(Self {
            rules,
            default_table: default_table.into(),
        })
    }

    pub fn default_table(&self) -> &str {
        &self.default_table
    }

    /// Number of enabled rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Table and policy for one key
    pub fn classify(&self, key: &str) -> (&str, TransferPolicy) {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(key))
            .map(|rule| (rule.table.as_str(), rule.policy))
            .unwrap_or((self.default_table.as_str(), TransferPolicy::default()))
    }

    /// Group objects by destination table
    pub fn route(&self, objects: &[CandidateObject]) -> RoutingTable {
        let mut sorted: Vec<&CandidateObject> = objects.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        sorted.dedup_by(|a, b| a.key == b.key);

        let mut table: RoutingTable = BTreeMap::new();
        for object in sorted {
            let (name, policy) = self.classify(&object.key);
            tracing::trace!(key = %object.key, table = name, "Routed");
            table.entry(name.to_string()).or_default().push(RoutedObject {
                object: object.clone(),
                policy,
            });
        }
        table
    }
}

/// Compile `patterns` and route `objects` in one step
pub fn route(
    objects: &[CandidateObject],
    patterns: &[FilePattern],
    default_table: &str,
) -> Result<RoutingTable> {
    Ok(Router::new(patterns, default_table)?.route(objects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TABLE;

    const MB: u64 = 1024 * 1024;

    fn objects(items: &[(&str, u64)]) -> Vec<CandidateObject> {
        items
            .iter()
            .map(|(key, size)| CandidateObject::new(*key, *size))
            .collect()
    }

    fn keys(routed: &[RoutedObject]) -> Vec<&str> {
        routed.iter().map(|r| r.object.key.as_str()).collect()
    }

    #[test]
    fn test_first_enabled_match_wins() {
        let patterns = vec![
            FilePattern::new("*.csv", "T_CSV").with_max_file_size(50 * MB),
            FilePattern::new("*", "T_OTHER"),
        ];
        let table = route(
            &objects(&[("a.csv", 10 * MB), ("b.csv", 60 * MB), ("c.json", MB)]),
            &patterns,
            DEFAULT_TABLE,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(keys(&table["T_CSV"]), vec!["a.csv", "b.csv"]);
        assert_eq!(keys(&table["T_OTHER"]), vec!["c.json"]);
        assert_eq!(table["T_CSV"][0].policy.max_file_size, 50 * MB);
        assert_eq!(table["T_OTHER"][0].policy, TransferPolicy::default());
    }

    #[test]
    fn test_disabled_patterns_ignored() {
        let patterns = vec![
            FilePattern::new("*.csv", "DISABLED").disabled(),
            FilePattern::new("*.csv", "ENABLED"),
        ];
        let table = route(&objects(&[("a.csv", 1)]), &patterns, DEFAULT_TABLE).unwrap();
        assert!(!table.contains_key("DISABLED"));
        assert_eq!(keys(&table["ENABLED"]), vec!["a.csv"]);
    }

    #[test]
    fn test_unmatched_go_to_default_table() {
        let patterns = vec![FilePattern::new("*.csv", "T_CSV")];
        let table = route(&objects(&[("x.parquet", 5)]), &patterns, "FALLBACK").unwrap();
        assert_eq!(keys(&table["FALLBACK"]), vec!["x.parquet"]);
        assert_eq!(table["FALLBACK"][0].policy.processing_mode, ProcessingMode::Auto);
    }

    #[test]
    fn test_no_patterns_routes_everything_to_default() {
        let table = route(&objects(&[("a", 1), ("b", 2)]), &[], DEFAULT_TABLE).unwrap();
        assert_eq!(table.keys().collect::<Vec<_>>(), vec![DEFAULT_TABLE]);
        assert_eq!(table[DEFAULT_TABLE].len(), 2);
    }

    #[test]
    fn test_route_is_deterministic() {
        let patterns = vec![
            FilePattern::new("logs/*", "LOGS"),
            FilePattern::new("*.csv", "CSV"),
        ];
        let forward = objects(&[("z.csv", 1), ("logs/b", 2), ("a.csv", 3), ("logs/a", 4)]);
        let mut reversed = forward.clone();
        reversed.reverse();

        let first = route(&forward, &patterns, DEFAULT_TABLE).unwrap();
        let second = route(&reversed, &patterns, DEFAULT_TABLE).unwrap();
        assert_eq!(first, second);
        assert_eq!(keys(&first["CSV"]), vec!["a.csv", "z.csv"]);
        assert_eq!(keys(&first["LOGS"]), vec!["logs/a", "logs/b"]);
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let table = route(&objects(&[("a", 1), ("a", 1)]), &[], DEFAULT_TABLE).unwrap();
        assert_eq!(table[DEFAULT_TABLE].len(), 1);
    }

    #[test]
    fn test_leading_slash_patterns() {
        let patterns = vec![FilePattern::csv("/landing", "CSV_FILES")];
        let table = route(&objects(&[("landing/a.csv", 1)]), &patterns, DEFAULT_TABLE).unwrap();
        assert_eq!(keys(&table["CSV_FILES"]), vec!["landing/a.csv"]);
    }

    #[test]
    fn test_empty_input() {
        let table = route(&[], &[FilePattern::new("*", "ALL")], DEFAULT_TABLE).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let patterns = vec![FilePattern::new("*".repeat(65), "T")];
        assert!(Router::new(&patterns, DEFAULT_TABLE).is_err());
    }

    #[test]
    fn test_ceiling_is_inclusive() {
        let policy = TransferPolicy {
            max_file_size: 100,
            processing_mode: ProcessingMode::Auto,
        };
        assert!(!policy.exceeds_ceiling(100));
        assert!(policy.exceeds_ceiling(101));
        assert!(!TransferPolicy::default().exceeds_ceiling(u64::MAX));
    }
}
