use crate::error::{Result, TransferError};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use regex::Regex;
use sql_parse::{CreateDefinition, CreateTable, ParseOptions, SQLDialect, Statement, Type};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub type_name: String,
    pub is_primary_key: bool,
}

/// Column metadata for one table, as captured from `SHOW CREATE TABLE`.
/// Primary-key columns are listed in declaration order, which is what lets
/// `Rule` decide `composite_key` and build routing keys deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub schema: String,
    pub table: String,
    pub fields: Vec<FieldMeta>,
}

impl TableMeta {
    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    pub fn primary_key_columns(&self) -> Vec<&FieldMeta> {
        self.fields.iter().filter(|f| f.is_primary_key).collect()
    }
}

fn primary_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)PRIMARY\s+KEY\s*\(([^)]*)\)").expect("static PK regex is valid")
    })
}

/// Fetches and parses the metadata for one table via `SHOW CREATE TABLE`,
/// the same entry point `akkw-mini-canal`'s `TableMetaCache` uses, adapted to
/// also recover primary-key columns.
pub async fn fetch_table_meta(conn: &mut Conn, schema: &str, table: &str) -> Result<TableMeta> {
    let full_name = format!("`{}`.`{}`", schema, table);
    let row: Option<(String, String)> = conn
        .query_first(format!("SHOW CREATE TABLE {}", full_name))
        .await
        .map_err(TransferError::Mysql)?;

    let (_, ddl) = row.ok_or_else(|| {
        TransferError::MetadataFetchFailed {
            schema: schema.to_string(),
            table: table.to_string(),
            source: Box::new(TransferError::SourceUnavailable(
                "SHOW CREATE TABLE returned no rows".to_string(),
            )),
        }
    })?;

    parse_ddl(&ddl, schema, table).map_err(|source| TransferError::MetadataFetchFailed {
        schema: schema.to_string(),
        table: table.to_string(),
        source: Box::new(source),
    })
}

pub fn parse_ddl(ddl: &str, schema: &str, table: &str) -> Result<TableMeta> {
    let options = ParseOptions::new().dialect(SQLDialect::MariaDB);
    let mut issues = Vec::new();
    let mut stmts = sql_parse::parse_statements(ddl, &mut issues, &options);

    let create: CreateTable = match stmts.pop() {
        Some(Statement::CreateTable(c)) => c,
        _ => {
            return Err(TransferError::RuleCompileFailed {
                schema: schema.to_string(),
                table: table.to_string(),
                source: "SHOW CREATE TABLE did not parse to a CREATE TABLE statement".to_string(),
            })
        }
    };

    let pk_columns: Vec<String> = primary_key_regex()
        .captures(ddl)
        .map(|caps| {
            caps[1]
                .split(',')
                .map(|c| c.trim().trim_matches('`').to_string())
                .collect()
        })
        .unwrap_or_default();

    let mut fields = Vec::new();
    for definition in create.create_definitions {
        if let CreateDefinition::ColumnDefinition {
            identifier,
            data_type,
        } = definition
        {
            let name = identifier.value.to_string();
            let type_name = describe_type(&data_type.type_);
            let is_primary_key = pk_columns.iter().any(|c| c == &name);
            fields.push(FieldMeta {
                name,
                type_name,
                is_primary_key,
            });
        }
    }

    Ok(TableMeta {
        schema: schema.to_string(),
        table: table.to_string(),
        fields,
    })
}

fn describe_type(type_: &Type) -> String {
    match type_ {
        Type::Boolean => "bool".to_string(),
        Type::TinyInt(e) => format!("tinyint({})", e.map(|v| v.0).unwrap_or_default()),
        Type::SmallInt(e) => format!("smallint({})", e.map(|v| v.0).unwrap_or_default()),
        Type::Integer(e) => format!("integer({})", e.map(|v| v.0).unwrap_or_default()),
        Type::Int(e) => format!("int({})", e.map(|v| v.0).unwrap_or_default()),
        Type::BigInt(e) => format!("bigint({})", e.map(|v| v.0).unwrap_or_default()),
        Type::Char(e) => format!("char({})", e.map(|v| v.0).unwrap_or_default()),
        Type::VarChar(e) => format!("varchar({})", e.map(|v| v.0).unwrap_or_default()),
        Type::TinyText(_) => "tinytext".to_string(),
        Type::MediumText(_) => "mediumtext".to_string(),
        Type::Text(_) => "text".to_string(),
        Type::LongText(_) => "longtext".to_string(),
        Type::Enum(values) => format!("enum({})", values.len()),
        Type::Set(values) => format!("set({})", values.len()),
        Type::Float8 => "float8".to_string(),
        Type::Float(e) => format!("float({})", e.map(|(a, b)| format!("{a}.{b}")).unwrap_or_default()),
        Type::Double(e) => format!("double({})", e.map(|(a, b)| format!("{a}.{b}")).unwrap_or_default()),
        Type::Numeric(a, b, _) => format!("numeric({a}.{b})"),
        Type::DateTime(_) => "datetime".to_string(),
        Type::Timestamp(_) => "timestamp".to_string(),
        Type::Time(_) => "time".to_string(),
        Type::TinyBlob(_) => "tinyblob".to_string(),
        Type::MediumBlob(_) => "mediumblob".to_string(),
        Type::Date => "date".to_string(),
        Type::Blob(_) => "blob".to_string(),
        Type::LongBlob(_) => "longblob".to_string(),
        Type::VarBinary(_) => "varbinary".to_string(),
        Type::Binary(_) => "binary".to_string(),
        #[allow(unreachable_patterns)]
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primary_key_and_column_types() {
        let ddl = "CREATE TABLE `t` (\n  `id` int(11) NOT NULL,\n  `name` varchar(64) DEFAULT NULL,\n  PRIMARY KEY (`id`)\n)";
        let meta = parse_ddl(ddl, "app", "t").unwrap();
        assert_eq!(meta.column_count(), 2);
        let pk = meta.primary_key_columns();
        assert_eq!(pk.len(), 1);
        assert_eq!(pk[0].name, "id");
    }

    #[test]
    fn detects_composite_primary_key() {
        let ddl = "CREATE TABLE `t` (\n  `a` int(11) NOT NULL,\n  `b` int(11) NOT NULL,\n  PRIMARY KEY (`a`,`b`)\n)";
        let meta = parse_ddl(ddl, "app", "t").unwrap();
        assert_eq!(meta.primary_key_columns().len(), 2);
    }

    #[test]
    fn table_with_no_primary_key() {
        let ddl = "CREATE TABLE `t` (\n  `a` int(11) NOT NULL\n)";
        let meta = parse_ddl(ddl, "app", "t").unwrap();
        assert!(meta.primary_key_columns().is_empty());
    }
}
