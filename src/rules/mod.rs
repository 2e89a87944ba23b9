pub mod registry;
pub mod rule;
pub mod script;
pub mod table_meta;

pub use registry::RuleRegistry;
pub use rule::Rule;
pub use script::CompiledScript;
pub use table_meta::{fetch_table_meta, parse_ddl, FieldMeta, TableMeta};
