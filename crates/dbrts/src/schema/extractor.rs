//! Reads live structure and row counts from a PostgreSQL source.

use super::types::{Column, ForeignKey, Index, IndexMethod, Table};
use crate::error::{Result, TransferError};
use deadpool_postgres::{Object, Pool};
use tracing::{debug, info};

const TABLES_QUERY: &str = r#"
    SELECT table_schema::text, table_name::text
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema NOT IN ('pg_catalog', 'information_schema')
      AND table_schema NOT LIKE 'pg\_toast%'
      AND table_schema NOT LIKE 'pg\_temp%'
      AND ($1::text IS NULL OR table_schema = $1::text)
    ORDER BY table_schema, table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text,
        format_type(a.atttypid, a.atttypmod)::text,
        c.is_nullable::text = 'YES',
        c.column_default::text,
        c.character_maximum_length::int4,
        c.numeric_precision::int4,
        c.numeric_scale::int4,
        a.attidentity IN ('a', 'd'),
        c.ordinal_position::int4
    FROM information_schema.columns c
    JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
    JOIN pg_catalog.pg_class t ON t.relnamespace = n.oid AND t.relname = c.table_name
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT a.attname::text
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'p'
      AND a.attnum = ANY(c.conkey)
    ORDER BY array_position(c.conkey, a.attnum)
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        c.conname::text,
        array_agg(a.attname::text ORDER BY array_position(c.conkey, a.attnum)),
        rn.nspname::text,
        rt.relname::text,
        array_agg(ra.attname::text ORDER BY array_position(c.confkey, ra.attnum)),
        CASE c.confdeltype
            WHEN 'r' THEN 'RESTRICT'
            WHEN 'c' THEN 'CASCADE'
            WHEN 'n' THEN 'SET NULL'
            WHEN 'd' THEN 'SET DEFAULT'
            ELSE 'NO ACTION'
        END,
        CASE c.confupdtype
            WHEN 'r' THEN 'RESTRICT'
            WHEN 'c' THEN 'CASCADE'
            WHEN 'n' THEN 'SET NULL'
            WHEN 'd' THEN 'SET DEFAULT'
            ELSE 'NO ACTION'
        END
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    JOIN LATERAL unnest(c.conkey, c.confkey) AS k(attnum, ref_attnum) ON true
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = rt.oid AND ra.attnum = k.ref_attnum
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'f'
    GROUP BY c.conname, rn.nspname, rt.relname, c.confdeltype, c.confupdtype
    ORDER BY c.conname
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        i.relname::text,
        ix.indisunique,
        ix.indisprimary,
        pg_get_indexdef(ix.indexrelid)
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    WHERE n.nspname = $1
      AND t.relname = $2
      AND NOT ix.indisprimary
    ORDER BY i.relname
"#;

/// Builds a schema snapshot from a source database.
pub struct SchemaExtractor<'a> {
    pool: &'a Pool,
}

impl<'a> SchemaExtractor<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// Extract every base table, optionally limited to one schema.
    ///
    /// Any failure aborts the whole extraction; no partial snapshot is returned.
    pub async fn extract_tables(&self, schema_filter: Option<&str>) -> Result<Vec<Table>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "getting connection for schema extraction"))?;

        let rows = client
            .query(TABLES_QUERY, &[&schema_filter])
            .await
            .map_err(|e| TransferError::extraction("table list", e))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let mut table = Table::new(row.get::<_, String>(0), row.get::<_, String>(1));
            load_table(&client, &mut table)
                .await
                .map_err(|e| TransferError::extraction(table.full_name(), e))?;
            tables.push(table);
        }

        info!(
            "Extracted {} tables{}",
            tables.len(),
            schema_filter
                .map(|s| format!(" from schema '{}'", s))
                .unwrap_or_default()
        );
        Ok(tables)
    }
}

async fn load_table(client: &Object, table: &mut Table) -> Result<()> {
    load_columns(client, table).await?;
    load_primary_key(client, table).await?;
    load_foreign_keys(client, table).await?;
    load_indexes(client, table).await?;
    load_row_count(client, table).await?;

    debug!(
        "{}: {} columns, pk {:?}, {} fks, {} indexes, {} rows",
        table.full_name(),
        table.columns.len(),
        table.primary_key,
        table.foreign_keys.len(),
        table.indexes.len(),
        table.row_count
    );
    Ok(())
}

async fn load_columns(client: &Object, table: &mut Table) -> Result<()> {
    let rows = client
        .query(COLUMNS_QUERY, &[&table.schema, &table.name])
        .await?;

    for row in rows {
        table.columns.push(Column {
            name: row.try_get(0)?,
            data_type: row.try_get(1)?,
            is_nullable: row.try_get(2)?,
            default: row.try_get(3)?,
            max_length: row.try_get(4)?,
            numeric_precision: row.try_get(5)?,
            numeric_scale: row.try_get(6)?,
            is_identity: row.try_get(7)?,
            ordinal_position: row.try_get(8)?,
        });
    }
    Ok(())
}

async fn load_primary_key(client: &Object, table: &mut Table) -> Result<()> {
    let rows = client
        .query(PRIMARY_KEY_QUERY, &[&table.schema, &table.name])
        .await?;

    for row in rows {
        table.primary_key.push(row.try_get(0)?);
    }
    Ok(())
}

async fn load_foreign_keys(client: &Object, table: &mut Table) -> Result<()> {
    let rows = client
        .query(FOREIGN_KEYS_QUERY, &[&table.schema, &table.name])
        .await?;

    for row in rows {
        table.foreign_keys.push(ForeignKey {
            name: row.try_get(0)?,
            columns: row.try_get(1)?,
            ref_schema: row.try_get(2)?,
            ref_table: row.try_get(3)?,
            ref_columns: row.try_get(4)?,
            on_delete: row.try_get(5)?,
            on_update: row.try_get(6)?,
        });
    }
    Ok(())
}

async fn load_indexes(client: &Object, table: &mut Table) -> Result<()> {
    let rows = client
        .query(INDEXES_QUERY, &[&table.schema, &table.name])
        .await?;

    for row in rows {
        let name: String = row.try_get(0)?;
        let definition: String = row.try_get(3)?;
        let parsed = parse_index_definition(&definition).ok_or_else(|| {
            TransferError::Value(format!(
                "unrecognized definition for index {}: {}",
                name, definition
            ))
        })?;

        table.indexes.push(Index {
            name,
            table: table.name.clone(),
            columns: parsed.columns,
            include_columns: parsed.include_columns,
            predicate: parsed.predicate,
            is_unique: row.try_get(1)?,
            is_primary: row.try_get(2)?,
            method: parsed.method,
        });
    }
    Ok(())
}

async fn load_row_count(client: &Object, table: &mut Table) -> Result<()> {
    let query = format!("SELECT COUNT(*)::int8 FROM {}", table.qualified_ident());
    let row = client.query_one(&query, &[]).await?;
    let count: i64 = row.try_get(0)?;
    table.row_count = count.max(0) as u64;
    Ok(())
}

/// Parts of a `pg_get_indexdef` rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub method: IndexMethod,
    pub columns: Vec<String>,
    pub include_columns: Vec<String>,
    pub predicate: Option<String>,
}

/// Parse `CREATE [UNIQUE] INDEX name ON tbl USING method (keys) [INCLUDE (...)] [WHERE pred]`.
pub fn parse_index_definition(definition: &str) -> Option<IndexDefinition> {
    let (method, rest) = match find_top_level(definition, " USING ") {
        Some(pos) => {
            let after = &definition[pos + " USING ".len()..];
            let end = after.find(|c: char| c == ' ' || c == '(').unwrap_or(after.len());
            (IndexMethod::parse(&after[..end]), &after[end..])
        }
        None => (IndexMethod::default(), definition),
    };

    let (keys, rest) = take_parenthesized(rest)?;
    let columns = split_top_level(keys);
    if columns.is_empty() {
        return None;
    }

    let mut rest = rest.trim_start();
    let mut include_columns = Vec::new();
    if let Some(after) = rest.strip_prefix("INCLUDE") {
        let (included, tail) = take_parenthesized(after)?;
        include_columns = split_top_level(included);
        rest = tail.trim_start();
    }

    let predicate = find_top_level(rest, "WHERE ")
        .map(|pos| strip_outer_parens(rest[pos + "WHERE ".len()..].trim()).to_string());

    Some(IndexDefinition {
        method,
        columns,
        include_columns,
        predicate,
    })
}

/// Position of `needle` outside quotes and parentheses.
fn find_top_level(haystack: &str, needle: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in haystack.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                _ if depth == 0 && haystack[i..].starts_with(needle) => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Take the first balanced `( ... )` group, returning its contents and the remainder.
fn take_parenthesized(input: &str) -> Option<(&str, &str)> {
    let start = input.find('(')?;
    if !input[..start].trim().is_empty() {
        return None;
    }

    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in input[start..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start + i;
                        return Some((&input[start + 1..end], &input[end + 1..]));
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Split on commas outside quotes and parentheses.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(input[start..i].trim().to_string());
                    start = i + 1;
                }
                _ => {}
            },
        }
    }

    let last = input[start..].trim();
    if !last.is_empty() {
        parts.push(last.to_string());
    }
    parts
}

fn strip_outer_parens(expr: &str) -> &str {
    match take_parenthesized(expr) {
        Some((inner, rest)) if rest.trim().is_empty() => inner,
        _ => expr,
    }
}
