//! Replays a schema snapshot against a target inside one transaction.
//!
//! Three passes run over all tables: tables (with inline primary keys), then
//! indexes, then foreign keys. Table and foreign key failures are fatal.
//! Index failures are rolled back to a savepoint, logged and skipped.
//!
//! The foreign key pass is also available on its own so a transfer can add
//! constraints after the data is copied.

use super::types::{nextval_sequence, quote_ident, Column, ForeignKey, Index, Table};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const INDEX_SAVEPOINT: &str = "dbrts_index";

/// Executes one SQL statement inside an open transaction.
#[async_trait]
pub trait StatementExecutor: Send {
    async fn execute(&mut self, sql: &str) -> Result<()>;
}

#[async_trait]
impl StatementExecutor for deadpool_postgres::Transaction<'_> {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.batch_execute(sql).await?;
        Ok(())
    }
}

/// Outcome of a successful creation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationReport {
    pub tables_created: usize,
    pub indexes_created: usize,
    /// Indexes that failed and were skipped, as `(index, error)`.
    pub indexes_skipped: Vec<(String, String)>,
    pub foreign_keys_created: usize,
}

/// Generates and executes DDL for a schema snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaCreator;

impl SchemaCreator {
    pub fn new() -> Self {
        Self
    }

    /// Run all three passes through `exec`. The caller owns the transaction:
    /// commit on `Ok`, roll back on `Err`.
    pub async fn create_tables<E>(&self, exec: &mut E, tables: &[Table]) -> Result<CreationReport>
    where
        E: StatementExecutor + ?Sized,
    {
        let mut report = self.create_structure(exec, tables).await?;
        report.foreign_keys_created = self.create_foreign_keys(exec, tables).await?;
        Ok(report)
    }

    /// Passes 1 and 2: schemas, sequences, tables, then indexes.
    pub async fn create_structure<E>(&self, exec: &mut E, tables: &[Table]) -> Result<CreationReport>
    where
        E: StatementExecutor + ?Sized,
    {
        let mut report = CreationReport::default();

        // Pass 1: schemas, sequences, tables
        for schema in schemas_to_create(tables) {
            let sql = create_schema_sql(&schema);
            debug!("{}", sql);
            exec.execute(&sql)
                .await
                .map_err(|e| TransferError::creation("table", format!("schema {}", schema), e))?;
        }

        for table in tables {
            for sql in create_sequence_sql(table) {
                debug!("{}", sql);
                exec.execute(&sql)
                    .await
                    .map_err(|e| TransferError::creation("table", table.full_name(), e))?;
            }

            let sql = create_table_sql(table);
            debug!("{}", sql);
            exec.execute(&sql)
                .await
                .map_err(|e| TransferError::creation("table", table.full_name(), e))?;
            report.tables_created += 1;
        }
        info!("Created {} tables", report.tables_created);

        // Pass 2: indexes
        for table in tables {
            for index in table.creatable_indexes() {
                let sql = create_index_sql(table, index);
                debug!("{}", sql);

                exec.execute(&format!("SAVEPOINT {}", INDEX_SAVEPOINT))
                    .await
                    .map_err(|e| TransferError::creation("index", &index.name, e))?;

                match exec.execute(&sql).await {
                    Ok(()) => {
                        exec.execute(&format!("RELEASE SAVEPOINT {}", INDEX_SAVEPOINT))
                            .await
                            .map_err(|e| TransferError::creation("index", &index.name, e))?;
                        report.indexes_created += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Failed to create index {} on {}: {}",
                            index.name,
                            table.full_name(),
                            e
                        );
                        exec.execute(&format!("ROLLBACK TO SAVEPOINT {}", INDEX_SAVEPOINT))
                            .await
                            .map_err(|e| TransferError::creation("index", &index.name, e))?;
                        report.indexes_skipped.push((index.name.clone(), e.to_string()));
                    }
                }
            }
        }
        if report.indexes_skipped.is_empty() {
            info!("Created {} indexes", report.indexes_created);
        } else {
            info!(
                "Created {} indexes, skipped {}",
                report.indexes_created,
                report.indexes_skipped.len()
            );
        }

        Ok(report)
    }

    /// Pass 3: foreign keys. Constraints already present on the target are
    /// left alone, so the pass can be replayed.
    pub async fn create_foreign_keys<E>(&self, exec: &mut E, tables: &[Table]) -> Result<usize>
    where
        E: StatementExecutor + ?Sized,
    {
        let mut created = 0;
        for table in tables {
            for fk in &table.foreign_keys {
                let sql = guarded_foreign_key_sql(table, fk);
                debug!("{}", sql);
                exec.execute(&sql).await.map_err(|e| {
                    TransferError::creation(
                        "foreign key",
                        format!("{} on {}", fk.name, table.full_name()),
                        e,
                    )
                })?;
                created += 1;
            }
        }
        info!("Created {} foreign keys", created);
        Ok(created)
    }
}

/// Non-default schemas referenced by the snapshot, in name order.
fn schemas_to_create(tables: &[Table]) -> BTreeSet<String> {
    tables
        .iter()
        .map(|t| t.schema.clone())
        .filter(|s| s != "public")
        .collect()
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// `CREATE SEQUENCE` statements for sequences named by column defaults.
pub fn create_sequence_sql(table: &Table) -> Vec<String> {
    table
        .columns
        .iter()
        .filter_map(|c| c.default.as_deref().and_then(nextval_sequence))
        .map(|seq| format!("CREATE SEQUENCE IF NOT EXISTS {}", seq))
        .collect()
}

/// Column fragment: name, type, identity, `NOT NULL`, `DEFAULT <expr>`.
pub fn column_definition(col: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), column_type(col));

    if col.is_identity {
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    }
    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }
    if !col.is_identity {
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
    }
    def
}

/// Type with length or precision modifiers. A type name that already carries
/// its modifiers is used as is.
pub fn column_type(col: &Column) -> String {
    let base = col.data_type.as_str();
    if base.contains('(') {
        return base.to_string();
    }
    match base {
        "character varying" | "character" | "varchar" | "char" | "bit" | "bit varying" => {
            match col.max_length {
                Some(len) if len > 0 => format!("{}({})", base, len),
                _ => base.to_string(),
            }
        }
        "numeric" | "decimal" => match (col.numeric_precision, col.numeric_scale) {
            (Some(p), Some(s)) if p > 0 => format!("{}({},{})", base, p, s),
            (Some(p), None) if p > 0 => format!("{}({})", base, p),
            _ => base.to_string(),
        },
        _ => base.to_string(),
    }
}

pub fn create_table_sql(table: &Table) -> String {
    let mut columns = table.columns.clone();
    columns.sort_by_key(|c| c.ordinal_position);

    let mut parts: Vec<String> = columns.iter().map(column_definition).collect();
    if table.has_pk() {
        let pk: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.qualified_ident(),
        parts.join(",\n    ")
    )
}

pub fn create_index_sql(table: &Table, index: &Index) -> String {
    let mut sql = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({})",
        if index.is_unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        table.qualified_ident(),
        index.method,
        index.columns.join(", ")
    );
    if !index.include_columns.is_empty() {
        sql.push_str(&format!(" INCLUDE ({})", index.include_columns.join(", ")));
    }
    if let Some(predicate) = &index.predicate {
        sql.push_str(&format!(" WHERE ({})", predicate));
    }
    sql
}

pub fn create_foreign_key_sql(table: &Table, fk: &ForeignKey) -> String {
    let cols: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
    let ref_cols: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();

    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}.{} ({})",
        table.qualified_ident(),
        quote_ident(&fk.name),
        cols.join(", "),
        quote_ident(&fk.ref_schema),
        quote_ident(&fk.ref_table),
        ref_cols.join(", ")
    );
    if let Some(action) = referential_action(&fk.on_delete) {
        sql.push_str(&format!(" ON DELETE {}", action));
    }
    if let Some(action) = referential_action(&fk.on_update) {
        sql.push_str(&format!(" ON UPDATE {}", action));
    }
    sql
}

/// `create_foreign_key_sql` wrapped so it only runs when the table has no
/// constraint of that name yet.
pub fn guarded_foreign_key_sql(table: &Table, fk: &ForeignKey) -> String {
    format!(
        "DO $dbrts$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_catalog.pg_constraint WHERE conname = {} AND conrelid = {}::regclass) THEN {}; END IF; END $dbrts$",
        quote_literal(&fk.name),
        quote_literal(&table.qualified_ident()),
        create_foreign_key_sql(table, fk)
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Normalized action, or `None` for the default `NO ACTION`.
fn referential_action(action: &str) -> Option<String> {
    let normalized = action.trim().replace('_', " ").to_uppercase();
    match normalized.as_str() {
        "" | "NO ACTION" => None,
        _ => Some(normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::IndexMethod;

    #[derive(Default)]
    struct RecordingExecutor {
        statements: Vec<String>,
        fail_when: Vec<&'static str>,
    }

    #[async_trait]
    impl StatementExecutor for RecordingExecutor {
        async fn execute(&mut self, sql: &str) -> Result<()> {
            self.statements.push(sql.to_string());
            if self.fail_when.iter().any(|f| sql.contains(f)) {
                return Err(TransferError::Value(format!("rejected: {}", sql)));
            }
            Ok(())
        }
    }

    fn col(name: &str, ty: &str, nullable: bool, pos: i32) -> Column {
        let mut c = Column::new(name, ty);
        c.is_nullable = nullable;
        c.ordinal_position = pos;
        c
    }

    fn index(name: &str, table: &str, columns: &[&str], unique: bool) -> Index {
        Index {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            include_columns: vec![],
            predicate: None,
            is_unique: unique,
            is_primary: false,
            method: IndexMethod::BTree,
        }
    }

    fn customers() -> Table {
        let mut t = Table::new("public", "customers");
        let mut id = col("id", "integer", false, 1);
        id.default = Some("nextval('customers_id_seq'::regclass)".into());
        let mut email = col("email", "character varying", false, 2);
        email.max_length = Some(255);
        t.columns = vec![id, email];
        t.primary_key = vec!["id".into()];
        t.indexes = vec![index("customers_email_key", "customers", &["email"], true)];
        t
    }

    fn orders() -> Table {
        let mut t = Table::new("sales", "orders");
        let mut total = col("total", "numeric", true, 3);
        total.numeric_precision = Some(12);
        total.numeric_scale = Some(2);
        let mut created = col("created_at", "timestamp with time zone", false, 4);
        created.default = Some("now()".into());
        t.columns = vec![
            col("id", "bigint", false, 1),
            col("customer_id", "integer", false, 2),
            total,
            created,
        ];
        t.primary_key = vec!["id".into()];
        t.indexes = vec![index("orders_customer_idx", "orders", &["customer_id"], false)];
        t.foreign_keys = vec![ForeignKey {
            name: "orders_customer_fk".into(),
            columns: vec!["customer_id".into()],
            ref_schema: "public".into(),
            ref_table: "customers".into(),
            ref_columns: vec!["id".into()],
            on_delete: "CASCADE".into(),
            on_update: "NO ACTION".into(),
        }];
        t
    }

    #[test]
    fn test_column_definition() {
        let t = customers();
        assert_eq!(
            column_definition(&t.columns[0]),
            "\"id\" integer NOT NULL DEFAULT nextval('customers_id_seq'::regclass)"
        );
        assert_eq!(
            column_definition(&t.columns[1]),
            "\"email\" character varying(255) NOT NULL"
        );

        let o = orders();
        assert_eq!(column_definition(&o.columns[2]), "\"total\" numeric(12,2)");

        let mut tags = col("tags", "character varying(20)[]", true, 5);
        tags.max_length = Some(20);
        assert_eq!(column_definition(&tags), "\"tags\" character varying(20)[]");
        let created = col("created", "timestamp(0) without time zone", true, 6);
        assert_eq!(
            column_definition(&created),
            "\"created\" timestamp(0) without time zone"
        );

        let mut ident = col("n", "bigint", false, 1);
        ident.is_identity = true;
        assert_eq!(
            column_definition(&ident),
            "\"n\" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL"
        );
    }

    #[test]
    fn test_create_table_orders_columns_by_position() {
        let mut t = orders();
        t.columns.reverse();
        let sql = create_table_sql(&t);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"sales\".\"orders\" ("));
        let id = sql.find("\"id\" bigint").unwrap();
        let cust = sql.find("\"customer_id\"").unwrap();
        let created = sql.find("\"created_at\"").unwrap();
        assert!(id < cust && cust < created);
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn test_foreign_key_omits_no_action() {
        let t = orders();
        let sql = create_foreign_key_sql(&t, &t.foreign_keys[0]);
        assert_eq!(
            sql,
            "ALTER TABLE \"sales\".\"orders\" ADD CONSTRAINT \"orders_customer_fk\" FOREIGN KEY (\"customer_id\") REFERENCES \"public\".\"customers\" (\"id\") ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_index_sql_with_include_and_predicate() {
        let t = customers();
        let mut idx = index("active_email", "customers", &["lower((email)::text)"], true);
        idx.include_columns = vec!["id".into()];
        idx.predicate = Some("deleted_at IS NULL".into());
        idx.method = IndexMethod::BTree;
        assert_eq!(
            create_index_sql(&t, &idx),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"active_email\" ON \"public\".\"customers\" USING btree (lower((email)::text)) INCLUDE (id) WHERE (deleted_at IS NULL)"
        );
    }

    #[tokio::test]
    async fn test_three_passes_in_order() {
        let tables = vec![orders(), customers()];
        let mut exec = RecordingExecutor::default();

        let report = SchemaCreator::new()
            .create_tables(&mut exec, &tables)
            .await
            .unwrap();

        assert_eq!(report.tables_created, 2);
        assert_eq!(report.indexes_created, 2);
        assert_eq!(report.foreign_keys_created, 1);
        assert!(report.indexes_skipped.is_empty());

        let pos = |needle: &str| {
            exec.statements
                .iter()
                .position(|s| s.contains(needle))
                .unwrap()
        };
        assert_eq!(exec.statements[0], "CREATE SCHEMA IF NOT EXISTS \"sales\"");
        assert!(pos("CREATE SEQUENCE IF NOT EXISTS customers_id_seq") < pos("CREATE TABLE IF NOT EXISTS \"public\".\"customers\""));
        let last_table = pos("CREATE TABLE IF NOT EXISTS \"public\".\"customers\"");
        let first_index = pos("CREATE INDEX IF NOT EXISTS \"orders_customer_idx\"");
        let fk = pos("ADD CONSTRAINT \"orders_customer_fk\"");
        assert!(last_table < first_index);
        assert!(first_index < fk);
        assert!(pos("CREATE UNIQUE INDEX IF NOT EXISTS \"customers_email_key\"") < fk);
    }

    #[tokio::test]
    async fn test_index_failure_is_skipped() {
        let tables = vec![customers(), orders()];
        let mut exec = RecordingExecutor {
            fail_when: vec!["\"customers_email_key\""],
            ..Default::default()
        };

        let report = SchemaCreator::new()
            .create_tables(&mut exec, &tables)
            .await
            .unwrap();

        assert_eq!(report.indexes_created, 1);
        assert_eq!(report.indexes_skipped.len(), 1);
        assert_eq!(report.indexes_skipped[0].0, "customers_email_key");
        assert!(exec
            .statements
            .iter()
            .any(|s| s == "ROLLBACK TO SAVEPOINT dbrts_index"));
        assert_eq!(report.foreign_keys_created, 1);
    }

    #[tokio::test]
    async fn test_primary_index_never_created() {
        let mut t = customers();
        let mut pkey = index("customers_pkey", "customers", &["id"], true);
        pkey.is_primary = true;
        t.indexes.push(pkey);

        let mut exec = RecordingExecutor::default();
        SchemaCreator::new()
            .create_tables(&mut exec, &[t])
            .await
            .unwrap();

        assert!(!exec.statements.iter().any(|s| s.contains("customers_pkey")));
    }

    #[tokio::test]
    async fn test_table_failure_is_fatal() {
        let tables = vec![customers(), orders()];
        let mut exec = RecordingExecutor {
            fail_when: vec!["CREATE TABLE IF NOT EXISTS \"sales\".\"orders\""],
            ..Default::default()
        };

        let err = SchemaCreator::new()
            .create_tables(&mut exec, &tables)
            .await
            .unwrap_err();

        match err {
            TransferError::SchemaCreation { pass, object, .. } => {
                assert_eq!(pass, "table");
                assert_eq!(object, "sales.orders");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!exec.statements.iter().any(|s| s.contains("INDEX")));
    }

    #[tokio::test]
    async fn test_foreign_key_failure_is_fatal() {
        let tables = vec![customers(), orders()];
        let mut exec = RecordingExecutor {
            fail_when: vec!["orders_customer_fk"],
            ..Default::default()
        };

        let err = SchemaCreator::new()
            .create_tables(&mut exec, &tables)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::SchemaCreation { ref pass, .. } if pass == "foreign key"
        ));
    }

    #[test]
    fn test_guarded_foreign_key_skips_existing_constraint() {
        let t = orders();
        let sql = guarded_foreign_key_sql(&t, &t.foreign_keys[0]);
        assert!(sql.starts_with("DO $dbrts$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_catalog.pg_constraint WHERE conname = 'orders_customer_fk' AND conrelid = '\"sales\".\"orders\"'::regclass) THEN ALTER TABLE"));
        assert!(sql.ends_with("ON DELETE CASCADE; END IF; END $dbrts$"));

        let mut odd = t.clone();
        odd.foreign_keys[0].name = "it's_fk".into();
        assert!(guarded_foreign_key_sql(&odd, &odd.foreign_keys[0]).contains("conname = 'it''s_fk'"));
    }

    #[tokio::test]
    async fn test_structure_then_foreign_keys_separately() {
        let tables = vec![customers(), orders()];
        let creator = SchemaCreator::new();

        let mut exec = RecordingExecutor::default();
        let report = creator.create_structure(&mut exec, &tables).await.unwrap();
        assert_eq!(report.tables_created, 2);
        assert_eq!(report.foreign_keys_created, 0);
        assert!(!exec.statements.iter().any(|s| s.contains("FOREIGN KEY")));

        let mut exec = RecordingExecutor::default();
        let created = creator.create_foreign_keys(&mut exec, &tables).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(exec.statements.len(), 1);
        assert!(exec.statements[0].contains("ADD CONSTRAINT \"orders_customer_fk\""));
    }

    #[tokio::test]
    async fn test_failed_savepoint_rollback_aborts() {
        let tables = vec![customers(), orders()];
        let mut exec = RecordingExecutor {
            fail_when: vec!["\"customers_email_key\"", "ROLLBACK TO SAVEPOINT"],
            ..Default::default()
        };

        let err = SchemaCreator::new()
            .create_tables(&mut exec, &tables)
            .await
            .unwrap_err();
        match err {
            TransferError::SchemaCreation { pass, object, .. } => {
                assert_eq!(pass, "index");
                assert_eq!(object, "customers_email_key");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!exec.statements.iter().any(|s| s.contains("FOREIGN KEY")));
    }

    #[tokio::test]
    async fn test_failed_savepoint_aborts_before_index() {
        let tables = vec![customers()];
        let mut exec = RecordingExecutor {
            fail_when: vec!["SAVEPOINT dbrts_index"],
            ..Default::default()
        };

        let err = SchemaCreator::new()
            .create_tables(&mut exec, &tables)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::SchemaCreation { ref pass, .. } if pass == "index"
        ));
        assert!(!exec.statements.iter().any(|s| s.starts_with("CREATE UNIQUE INDEX")));
    }
}
