//! Paged reads from a source table and per-page transactional writes to a target.

use super::value::{decode_row, ColumnKind, SqlValue};
use crate::config::Pagination;
use crate::error::{Result, TransferError};
use crate::schema::{quote_ident, Table};
use crate::transfer::{PageReader, PageWriter, Row};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tracing::debug;

/// Select list in column order. A table without columns selects a constant;
/// its rows decode to empty value lists.
fn select_list(table: &Table) -> String {
    if table.columns.is_empty() {
        return "NULL".to_string();
    }
    table
        .columns
        .iter()
        .map(|c| ColumnKind::from_type(&c.data_type).select_expr(&quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_by(table: &Table) -> String {
    let cols = table.order_columns();
    if cols.is_empty() {
        return "(SELECT NULL)".to_string();
    }
    cols.iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT ... ORDER BY <pk | first column | constant> OFFSET o LIMIT b`.
pub fn select_page_sql(table: &Table, offset: u64, limit: u64) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {} OFFSET {} LIMIT {}",
        select_list(table),
        table.qualified_ident(),
        order_by(table),
        offset,
        limit
    )
}

/// Keyset page: rows after the last primary key seen, in key order.
/// `after_key` adds the `WHERE (pk...) > ($1...)` seek predicate.
pub fn select_keyset_sql(table: &Table, after_key: bool, limit: u64) -> String {
    let order = order_by(table);
    let predicate = if after_key {
        let placeholders: Vec<String> = table
            .primary_key
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let data_type = table
                    .column(name)
                    .map(|c| c.data_type.as_str())
                    .unwrap_or("text");
                ColumnKind::from_type(data_type).placeholder(i + 1, data_type)
            })
            .collect();
        format!(" WHERE ({}) > ({})", order, placeholders.join(", "))
    } else {
        String::new()
    };

    format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT {}",
        select_list(table),
        table.qualified_ident(),
        predicate,
        order,
        limit
    )
}

/// `INSERT ... VALUES (...) ON CONFLICT DO NOTHING` for one row, or
/// `INSERT ... DEFAULT VALUES` for a table without columns.
pub fn insert_sql(table: &Table) -> String {
    if table.columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", table.qualified_ident());
    }
    let cols: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| ColumnKind::from_type(&c.data_type).placeholder(i + 1, &c.data_type))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        table.qualified_ident(),
        cols.join(", "),
        placeholders.join(", ")
    )
}

/// Check out a pooled connection on first use and keep it for the job.
async fn checkout<'a>(
    pool: &Pool,
    slot: &'a mut Option<Object>,
    context: &str,
) -> Result<&'a mut Object> {
    if slot.is_none() {
        let client = pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, context.to_string()))?;
        *slot = Some(client);
    }
    slot.as_mut()
        .ok_or_else(|| TransferError::pool("connection slot empty", context.to_string()))
}

/// Keyset position of a reader: where the primary key sits in each row and
/// the key of the last row read.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetCursor {
    positions: Vec<usize>,
    last_key: Option<Vec<SqlValue>>,
}

impl KeysetCursor {
    /// `None` when the table has no primary key to seek on.
    pub fn for_table(table: &Table) -> Option<Self> {
        if !table.has_pk() {
            return None;
        }
        let positions = table
            .primary_key
            .iter()
            .map(|pk| table.columns.iter().position(|c| &c.name == pk))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            positions,
            last_key: None,
        })
    }

    /// SQL for the next page.
    pub fn page_sql(&self, table: &Table, limit: u64) -> String {
        select_keyset_sql(table, self.last_key.is_some(), limit)
    }

    /// Bind parameters for [`KeysetCursor::page_sql`].
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.last_key
            .iter()
            .flatten()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect()
    }

    /// Remember the key of the last row of a page. An empty page keeps the
    /// previous position.
    pub fn advance(&mut self, page: &[Row]) {
        if let Some(last) = page.last() {
            self.last_key = Some(self.positions.iter().map(|&i| last[i].clone()).collect());
        }
    }

    pub fn last_key(&self) -> Option<&[SqlValue]> {
        self.last_key.as_deref()
    }
}

/// Reads one table page by page over a dedicated source connection.
pub struct PgPageReader {
    pool: Pool,
    table: Arc<Table>,
    kinds: Vec<ColumnKind>,
    keyset: Option<KeysetCursor>,
    client: Option<Object>,
}

impl PgPageReader {
    pub fn new(pool: Pool, table: Arc<Table>, pagination: Pagination) -> Self {
        let kinds = table
            .columns
            .iter()
            .map(|c| ColumnKind::from_type(&c.data_type))
            .collect();

        let keyset = match pagination {
            Pagination::Keyset => {
                let cursor = KeysetCursor::for_table(&table);
                if cursor.is_none() {
                    debug!(
                        "{}: no primary key, falling back to offset pagination",
                        table.full_name()
                    );
                }
                cursor
            }
            Pagination::Offset => None,
        };

        Self {
            pool,
            table,
            kinds,
            keyset,
            client: None,
        }
    }
}

#[async_trait]
impl PageReader for PgPageReader {
    async fn read_page(&mut self, offset: u64, limit: u64) -> Result<Vec<Row>> {
        let context = format!("reading {}", self.table.full_name());
        let client = checkout(&self.pool, &mut self.client, &context).await?;

        let rows = match &self.keyset {
            Some(cursor) => {
                let sql = cursor.page_sql(&self.table, limit);
                client.query(sql.as_str(), &cursor.params()).await?
            }
            None => {
                let sql = select_page_sql(&self.table, offset, limit);
                client.query(sql.as_str(), &[]).await?
            }
        };

        let page = rows
            .iter()
            .map(|row| decode_row(row, &self.kinds))
            .collect::<Result<Vec<_>>>()?;

        if let Some(cursor) = self.keyset.as_mut() {
            cursor.advance(&page);
        }
        Ok(page)
    }
}

/// Writes pages into one target table, one transaction per page.
pub struct PgPageWriter {
    pool: Pool,
    table: Arc<Table>,
    sql: String,
    client: Option<Object>,
}

impl PgPageWriter {
    pub fn new(pool: Pool, table: Arc<Table>) -> Self {
        let sql = insert_sql(&table);
        Self {
            pool,
            table,
            sql,
            client: None,
        }
    }
}

#[async_trait]
impl PageWriter for PgPageWriter {
    async fn write_page(&mut self, rows: Vec<Row>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let context = format!("writing {}", self.table.full_name());
        let client = checkout(&self.pool, &mut self.client, &context).await?;

        let tx = client.transaction().await?;
        let statement = tx.prepare_cached(&self.sql).await?;
        for row in &rows {
            let params: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            tx.execute(&statement, &params).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn orders() -> Table {
        let mut t = Table::new("public", "orders");
        t.columns = vec![
            Column::new("id", "bigint"),
            Column::new("region", "text"),
            Column::new("total", "numeric"),
        ];
        t.primary_key = vec!["region".into(), "id".into()];
        t
    }

    #[test]
    fn test_offset_page_orders_by_primary_key() {
        let sql = select_page_sql(&orders(), 1000, 50);
        assert_eq!(
            sql,
            "SELECT \"id\", \"region\", \"total\"::text FROM \"public\".\"orders\" ORDER BY \"region\", \"id\" OFFSET 1000 LIMIT 50"
        );
    }

    #[test]
    fn test_offset_page_without_primary_key_uses_first_column() {
        let mut t = orders();
        t.primary_key.clear();
        assert!(select_page_sql(&t, 0, 500).contains("ORDER BY \"id\" OFFSET 0 LIMIT 500"));

        t.columns.clear();
        assert!(select_page_sql(&t, 0, 500).contains("ORDER BY (SELECT NULL) "));
    }

    #[test]
    fn test_table_without_columns() {
        let t = Table::new("public", "empty_cols");
        assert_eq!(
            select_page_sql(&t, 0, 500),
            "SELECT NULL FROM \"public\".\"empty_cols\" ORDER BY (SELECT NULL) OFFSET 0 LIMIT 500"
        );
        assert_eq!(
            insert_sql(&t),
            "INSERT INTO \"public\".\"empty_cols\" DEFAULT VALUES"
        );
        assert!(KeysetCursor::for_table(&t).is_none());
    }

    #[test]
    fn test_keyset_cursor_advances_across_pages() {
        let t = orders();
        let mut cursor = KeysetCursor::for_table(&t).unwrap();
        assert!(cursor.params().is_empty());
        assert!(!cursor.page_sql(&t, 2).contains("WHERE"));

        let row = |id: i64, region: &str| {
            vec![
                SqlValue::I64(id),
                SqlValue::Text(region.into()),
                SqlValue::Text("9.50".into()),
            ]
        };
        cursor.advance(&[row(1, "eu"), row(7, "eu")]);
        assert_eq!(
            cursor.last_key(),
            Some(&[SqlValue::Text("eu".into()), SqlValue::I64(7)][..])
        );
        assert_eq!(cursor.params().len(), 2);
        assert!(cursor
            .page_sql(&t, 2)
            .contains("WHERE (\"region\", \"id\") > ($1, $2)"));

        cursor.advance(&[row(3, "us")]);
        assert_eq!(
            cursor.last_key(),
            Some(&[SqlValue::Text("us".into()), SqlValue::I64(3)][..])
        );

        cursor.advance(&[]);
        assert_eq!(
            cursor.last_key(),
            Some(&[SqlValue::Text("us".into()), SqlValue::I64(3)][..])
        );
    }

    #[test]
    fn test_keyset_requires_primary_key() {
        let mut t = orders();
        t.primary_key.clear();
        assert!(KeysetCursor::for_table(&t).is_none());
    }

    #[test]
    fn test_keyset_page() {
        let t = orders();
        assert_eq!(
            select_keyset_sql(&t, false, 500),
            "SELECT \"id\", \"region\", \"total\"::text FROM \"public\".\"orders\" ORDER BY \"region\", \"id\" LIMIT 500"
        );
        assert!(select_keyset_sql(&t, true, 500)
            .contains("WHERE (\"region\", \"id\") > ($1, $2) ORDER BY"));
    }

    #[test]
    fn test_insert_skips_conflicts_and_casts_text_columns() {
        assert_eq!(
            insert_sql(&orders()),
            "INSERT INTO \"public\".\"orders\" (\"id\", \"region\", \"total\") VALUES ($1, $2, $3::text::numeric) ON CONFLICT DO NOTHING"
        );
    }
}
