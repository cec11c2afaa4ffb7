use crate::connectors::DatabaseType;
use crate::models::{ColumnDefinition, TableSchema};

/// PostgreSQL -> MySQL base-type mapping. Entries are matched against the
/// normalized type, first as a whole and then with the parameter suffix
/// stripped, so parameterized keys like `TINYINT(1)` stay expressible.
const POSTGRES_TO_MYSQL: &[(&str, &str)] = &[
    ("BIGINT", "BIGINT"),
    ("INTEGER", "INT"),
    ("INT4", "INT"),
    ("SMALLINT", "SMALLINT"),
    ("SERIAL", "BIGINT"),
    ("BIGSERIAL", "BIGINT"),
    ("NUMERIC", "DECIMAL"),
    ("REAL", "FLOAT"),
    ("DOUBLE PRECISION", "DOUBLE"),
    ("VARCHAR", "VARCHAR"),
    ("CHARACTER VARYING", "VARCHAR"),
    ("CHAR", "CHAR"),
    ("TEXT", "TEXT"),
    ("BOOLEAN", "TINYINT(1)"),
    ("DATE", "DATE"),
    ("TIMESTAMP", "DATETIME"),
    ("TIMESTAMPTZ", "DATETIME"),
    ("TIME", "TIME"),
    ("JSON", "JSON"),
    ("JSONB", "JSON"),
    ("UUID", "CHAR(36)"),
    ("BYTEA", "BLOB"),
];

/// MySQL -> PostgreSQL, the inverse direction.
const MYSQL_TO_POSTGRES: &[(&str, &str)] = &[
    ("BIGINT", "BIGINT"),
    ("INT", "INTEGER"),
    ("SMALLINT", "SMALLINT"),
    ("DECIMAL", "NUMERIC"),
    ("FLOAT", "REAL"),
    ("DOUBLE", "DOUBLE PRECISION"),
    ("VARCHAR", "VARCHAR"),
    ("CHAR", "CHAR"),
    ("TEXT", "TEXT"),
    ("TINYINT(1)", "BOOLEAN"),
    ("DATE", "DATE"),
    ("DATETIME", "TIMESTAMP"),
    ("TIME", "TIME"),
    ("JSON", "JSONB"),
    ("BLOB", "BYTEA"),
];

fn type_map(source: DatabaseType, target: DatabaseType) -> Option<&'static [(&'static str, &'static str)]> {
    match (source, target) {
        (DatabaseType::PostgreSql, DatabaseType::MySql) => Some(POSTGRES_TO_MYSQL),
        (DatabaseType::MySql, DatabaseType::PostgreSql) => Some(MYSQL_TO_POSTGRES),
        _ => None,
    }
}

fn lookup<'a>(map: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    map.iter().find(|(from, _)| *from == key).map(|(_, to)| *to)
}

/// Convert a single dialect-tagged type string.
///
/// Normalizes to uppercase, strips time-zone qualifiers, maps the base type
/// and re-appends the original parameter suffix verbatim. Unmapped types
/// pass through unchanged.
pub fn convert_type(data_type: &str, map: &[(&str, &str)]) -> String {
    let normalized = data_type.trim().to_uppercase();
    let stripped = normalized
        .replace(" WITHOUT TIME ZONE", "")
        .replace(" WITH TIME ZONE", "");

    // Whole-type match first so parameterized entries (TINYINT(1), and
    // targets like CHAR(36)) take precedence over base mapping.
    if let Some(mapped) = lookup(map, &stripped) {
        return mapped.to_string();
    }

    let (base, params) = match stripped.find('(') {
        Some(idx) => (stripped[..idx].trim().to_string(), &stripped[idx..]),
        None => (stripped.clone(), ""),
    };

    let converted_base = lookup(map, &base).unwrap_or(&base);
    format!("{}{}", converted_base, params)
}

fn is_sequence_default(default: &str) -> bool {
    default.to_lowercase().contains("nextval(")
}

/// Convert a table schema between dialects. Identity when the dialects
/// match; unsupported pairs pass through with a warning.
pub fn convert_schema(
    schema: &TableSchema,
    source: DatabaseType,
    target: DatabaseType,
) -> TableSchema {
    if source == target {
        return schema.clone();
    }

    let map = match type_map(source, target) {
        Some(map) => map,
        None => {
            log::warn!(
                "No type mapping for {} -> {}, using source types as-is",
                source,
                target
            );
            return schema.clone();
        }
    };

    let drop_sequence_defaults =
        source == DatabaseType::PostgreSql && target == DatabaseType::MySql;

    let columns = schema
        .columns
        .iter()
        .map(|col| {
            let mut default = col.default.clone();
            // MySQL primary keys backed by a Postgres sequence rely on
            // AUTO_INCREMENT instead of the nextval() default.
            if drop_sequence_defaults && col.is_primary_key {
                if let Some(d) = &default {
                    if is_sequence_default(d) {
                        default = None;
                    }
                }
            }

            ColumnDefinition {
                name: col.name.clone(),
                data_type: convert_type(&col.data_type, map),
                nullable: col.nullable,
                default,
                is_primary_key: col.is_primary_key,
            }
        })
        .collect();

    let mut converted = TableSchema::new(&schema.name, columns, schema.primary_keys.clone());
    converted.indexes = schema.indexes.clone();
    converted
}
