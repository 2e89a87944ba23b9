use super::rule::Rule;
use super::script::CompiledScript;
use super::table_meta::fetch_table_meta;
use crate::config::RuleTemplate;
use crate::error::{Result, TransferError};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use parking_lot::RwLock;
use regex::escape as regex_escape;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Compiled table→rule mapping. Read-mostly: the only mutator is
/// `update_rule`, called from the Dispatcher on DDL events, which is why a
/// single `RwLock` around the map is sufficient.
pub struct RuleRegistry {
    rules: RwLock<HashMap<String, Rule>>,
    skip_no_pk: bool,
    data_dir: PathBuf,
}

impl RuleRegistry {
    /// Expands wildcard templates against `information_schema`, fetches
    /// metadata for every concrete table, and precompiles any transform
    /// scripts. Any failure aborts the whole registry; there is no partial
    /// state to recover from a half-built rule set.
    pub async fn compile(
        conn: &mut Conn,
        templates: &[RuleTemplate],
        skip_no_pk: bool,
        data_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let expanded = expand_templates(conn, templates).await?;

        let mut rules = HashMap::new();
        for (template, table) in expanded {
            let table_meta = fetch_table_meta(conn, &template.schema, &table).await?;

            if table_meta.primary_key_columns().is_empty() && !skip_no_pk {
                return Err(TransferError::ConfigInvalid(format!(
                    "table {}.{} must have a primary key (set skip_no_pk_table to allow it)",
                    template.schema, table
                )));
            }

            let mut concrete_template = template.clone();
            concrete_template.table = table.clone();

            let mut rule = Rule::from_template(&concrete_template, table_meta, skip_no_pk);

            if let Some(script_path) = &template.script_path {
                let compiled = CompiledScript::precompile(&data_dir, script_path).map_err(|e| {
                    TransferError::RuleCompileFailed {
                        schema: template.schema.clone(),
                        table: table.clone(),
                        source: e.to_string(),
                    }
                })?;
                rule.script = Some(Arc::new(compiled));
            }

            info!(rule = %rule.full_name(), composite_key = rule.composite_key, "compiled rule");
            rules.insert(rule.full_name(), rule);
        }

        Ok(Self {
            rules: RwLock::new(rules),
            skip_no_pk,
            data_dir,
        })
    }

    pub fn get(&self, schema: &str, table: &str) -> Option<Rule> {
        self.rules.read().get(&format!("{schema}.{table}")).cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.rules.read().keys().cloned().collect()
    }

    /// Re-fetches metadata for a known rule's table and reapplies the
    /// PK/composite checks. A DDL event for a table with no rule is a no-op.
    pub async fn update_rule(&self, conn: &mut Conn, schema: &str, table: &str) -> Result<()> {
        let key = format!("{schema}.{table}");
        if !self.rules.read().contains_key(&key) {
            return Ok(());
        }

        let table_meta = fetch_table_meta(conn, schema, table).await?;
        if table_meta.primary_key_columns().is_empty() && !self.skip_no_pk {
            warn!(%key, "DDL removed the primary key but skip_no_pk_table is false");
            return Err(TransferError::ConfigInvalid(format!(
                "table {key} no longer has a primary key"
            )));
        }

        let mut rules = self.rules.write();
        if let Some(rule) = rules.get_mut(&key) {
            rule.after_update_table_info(table_meta);
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[cfg(test)]
    pub(crate) fn for_test(rules: HashMap<String, Rule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            skip_no_pk: true,
            data_dir: PathBuf::new(),
        }
    }
}

/// Returns `true` when `pattern` has no regex metacharacters, i.e. it names
/// exactly one literal table.
fn is_literal_pattern(pattern: &str) -> bool {
    regex_escape(pattern) == pattern
}

async fn expand_templates(
    conn: &mut Conn,
    templates: &[RuleTemplate],
) -> Result<Vec<(RuleTemplate, String)>> {
    let mut seen_wildcards: HashSet<(String, String)> = HashSet::new();
    let mut expanded = Vec::new();

    for template in templates {
        if template.table == "*" {
            return Err(TransferError::ConfigInvalid(format!(
                "bare wildcard table name is forbidden for schema {}",
                template.schema
            )));
        }

        if is_literal_pattern(&template.table) {
            expanded.push((template.clone(), template.table.clone()));
            continue;
        }

        let wildcard_key = (template.schema.clone(), template.table.clone());
        if !seen_wildcards.insert(wildcard_key) {
            return Err(TransferError::ConfigInvalid(format!(
                "duplicate wildcard rule for {}.{}",
                template.schema, template.table
            )));
        }

        let matches: Vec<String> = conn
            .exec(
                "SELECT table_name FROM information_schema.tables WHERE table_name RLIKE ? AND table_schema = ?",
                (template.table.clone(), template.schema.clone()),
            )
            .await
            .map_err(TransferError::Mysql)?;

        info!(
            schema = %template.schema,
            pattern = %template.table,
            matched = matches.len(),
            "expanded wildcard rule"
        );

        for table in matches {
            expanded.push((template.clone(), table));
        }
    }

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_are_not_wildcards() {
        assert!(is_literal_pattern("users"));
        assert!(is_literal_pattern("user_profile"));
        assert!(!is_literal_pattern("user_.*"));
        assert!(!is_literal_pattern("user_[ab]"));
    }
}
