use super::script::CompiledScript;
use super::table_meta::TableMeta;
use crate::config::RuleTemplate;
use std::sync::Arc;

/// The compiled directive for one fully-qualified table. Shared immutably
/// after compilation except for the narrow mutation window of
/// `update_rule`, which the Dispatcher serializes against the registry's
/// write guard.
#[derive(Debug, Clone)]
pub struct Rule {
    pub schema: String,
    pub table: String,
    pub table_meta: TableMeta,
    pub composite_key: bool,
    pub projected_columns: Vec<String>,
    pub topic_template: String,
    pub key_template: String,
    pub script: Option<Arc<CompiledScript>>,
    pub skip_no_pk: bool,
}

impl Rule {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// `composite_key` tracks whether the primary key spans more than one
    /// column, since the key template resolution differs in that case.
    pub fn from_template(template: &RuleTemplate, table_meta: TableMeta, skip_no_pk: bool) -> Self {
        let pk_count = table_meta.primary_key_columns().len();
        let projected_columns = template
            .columns
            .clone()
            .unwrap_or_else(|| table_meta.fields.iter().map(|f| f.name.clone()).collect());

        let mut rule = Self {
            schema: template.schema.clone(),
            table: template.table.clone(),
            table_meta,
            composite_key: pk_count > 1,
            projected_columns,
            topic_template: template
                .topic_template
                .clone()
                .unwrap_or_else(|| format!("{}.{}", template.schema, template.table)),
            key_template: template.key_template.clone().unwrap_or_else(|| "{pk}".to_string()),
            script: None,
            skip_no_pk,
        };
        rule.initialize();
        rule
    }

    /// Projection/template binding hook, invoked once after the Rule is
    /// first built from a template and table metadata.
    pub fn initialize(&mut self) {
        if self.projected_columns.is_empty() {
            self.projected_columns = self
                .table_meta
                .fields
                .iter()
                .map(|f| f.name.clone())
                .collect();
        }
    }

    /// Invoked by `RuleRegistry::update_rule` after re-fetching metadata on
    /// DDL. Scripts are never recompiled here: they reference logical
    /// columns, not physical metadata, so they stay valid across the DDL.
    pub fn after_update_table_info(&mut self, table_meta: TableMeta) {
        let pk_count = table_meta.primary_key_columns().len();
        self.composite_key = pk_count > 1;
        self.table_meta = table_meta;
    }
}
