//! Schema snapshot types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions, ordered by ordinal position.
    pub columns: Vec<Column>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKey>,

    /// Non-primary indexes.
    pub indexes: Vec<Index>,

    /// Row count at extraction time. Only used to plan batches.
    pub row_count: u64,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            row_count: 0,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted `"schema"."table"` reference for SQL text.
    pub fn qualified_ident(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that drive pagination: the primary key, else the first column.
    /// Empty for a table with no columns.
    pub fn order_columns(&self) -> Vec<&str> {
        if self.has_pk() {
            return self.primary_key.iter().map(String::as_str).collect();
        }
        self.columns
            .first()
            .map(|c| vec![c.name.as_str()])
            .unwrap_or_default()
    }

    /// Indexes that may be explicitly created on a target.
    pub fn creatable_indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter().filter(|i| !i.is_primary)
    }

    /// Columns whose values come from a sequence.
    pub fn sequence_columns(&self) -> impl Iterator<Item = (&Column, SequenceRef)> {
        self.columns
            .iter()
            .filter_map(|c| c.sequence().map(|seq| (c, seq)))
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Engine-native type name with its modifiers, as rendered by
    /// `format_type` (e.g. "integer", "character varying(20)[]", "timestamp(0) without time zone").
    pub data_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default expression, replayed verbatim.
    pub default: Option<String>,

    /// Maximum length for character types.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub numeric_precision: Option<i32>,

    /// Numeric scale.
    pub numeric_scale: Option<i32>,

    /// Whether the column is an identity column.
    pub is_identity: bool,

    /// Ordinal position (1-based).
    pub ordinal_position: i32,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_identity: false,
            ordinal_position: 0,
        }
    }

    /// Sequence feeding this column, if any.
    pub fn sequence(&self) -> Option<SequenceRef> {
        if self.is_identity {
            return Some(SequenceRef::Owned);
        }
        self.default
            .as_deref()
            .and_then(nextval_sequence)
            .map(SequenceRef::Named)
    }
}

/// How a column's sequence is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceRef {
    /// Sequence named in a `nextval('...'::regclass)` default.
    Named(String),
    /// Sequence owned by an identity column.
    Owned,
}

/// Extract the sequence name from a `nextval('name'::regclass)` default.
pub fn nextval_sequence(default: &str) -> Option<String> {
    let rest = default.trim().strip_prefix("nextval('")?;
    let end = rest.find("'::regclass")?;
    let name = &rest[..end];
    if name.is_empty() {
        return None;
    }
    Some(name.replace("''", "'"))
}

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexMethod {
    #[default]
    BTree,
    Hash,
    Gin,
    Gist,
    SpGist,
    Brin,
}

impl IndexMethod {
    /// Infer the method from a keyword. Unknown keywords map to b-tree.
    pub fn parse(keyword: &str) -> Self {
        match keyword.trim().to_lowercase().as_str() {
            "hash" => IndexMethod::Hash,
            "gin" => IndexMethod::Gin,
            "gist" => IndexMethod::Gist,
            "spgist" => IndexMethod::SpGist,
            "brin" => IndexMethod::Brin,
            _ => IndexMethod::BTree,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            IndexMethod::BTree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gin => "gin",
            IndexMethod::Gist => "gist",
            IndexMethod::SpGist => "spgist",
            IndexMethod::Brin => "brin",
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Owning table name.
    pub table: String,

    /// Key elements in order, as rendered by the server (column names or expressions).
    pub columns: Vec<String>,

    /// Non-key columns (`INCLUDE`).
    pub include_columns: Vec<String>,

    /// Partial index predicate.
    pub predicate: Option<String>,

    /// Whether the index is unique.
    pub is_unique: bool,

    /// Whether the index backs the primary key. Never created explicitly.
    pub is_primary: bool,

    /// Access method.
    pub method: IndexMethod,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced schema name.
    pub ref_schema: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action ("NO ACTION", "CASCADE", ...).
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,
}

/// Type name with every `(...)` modifier removed, e.g.
/// "timestamp(3) without time zone" becomes "timestamp without time zone".
pub fn base_type_name(data_type: &str) -> String {
    let mut base = String::with_capacity(data_type.len());
    let mut depth = 0u32;
    for c in data_type.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => base.push(c),
            _ => {}
        }
    }
    base.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut table = Table::new("public", "orders");
        let mut id = Column::new("id", "integer");
        id.is_nullable = false;
        id.default = Some("nextval('orders_id_seq'::regclass)".into());
        id.ordinal_position = 1;
        let mut total = Column::new("total", "numeric");
        total.ordinal_position = 2;
        table.columns = vec![id, total];
        table
    }

    #[test]
    fn test_full_name_and_quoting() {
        let table = Table::new("sales", "Order \"Lines\"");
        assert_eq!(table.full_name(), "sales.Order \"Lines\"");
        assert_eq!(table.qualified_ident(), "\"sales\".\"Order \"\"Lines\"\"\"");
    }

    #[test]
    fn test_order_columns_prefers_primary_key() {
        let mut table = sample_table();
        assert_eq!(table.order_columns(), vec!["id"]);

        table.primary_key = vec!["total".into(), "id".into()];
        assert_eq!(table.order_columns(), vec!["total", "id"]);

        let empty = Table::new("public", "nothing");
        assert!(empty.order_columns().is_empty());
    }

    #[test]
    fn test_nextval_sequence() {
        assert_eq!(
            nextval_sequence("nextval('orders_id_seq'::regclass)"),
            Some("orders_id_seq".into())
        );
        assert_eq!(
            nextval_sequence("nextval('sales.\"Odd_seq\"'::regclass)"),
            Some("sales.\"Odd_seq\"".into())
        );
        assert_eq!(nextval_sequence("now()"), None);
    }

    #[test]
    fn test_sequence_columns() {
        let mut table = sample_table();
        let mut ident = Column::new("line_no", "bigint");
        ident.is_identity = true;
        table.columns.push(ident);

        let seqs: Vec<_> = table
            .sequence_columns()
            .map(|(c, s)| (c.name.clone(), s))
            .collect();
        assert_eq!(
            seqs,
            vec![
                ("id".to_string(), SequenceRef::Named("orders_id_seq".into())),
                ("line_no".to_string(), SequenceRef::Owned),
            ]
        );
    }

    #[test]
    fn test_base_type_name_strips_modifiers() {
        assert_eq!(base_type_name("character varying(20)"), "character varying");
        assert_eq!(base_type_name("character varying(20)[]"), "character varying[]");
        assert_eq!(
            base_type_name("timestamp(0) without time zone"),
            "timestamp without time zone"
        );
        assert_eq!(base_type_name("numeric(12,2)"), "numeric");
        assert_eq!(base_type_name("jsonb"), "jsonb");
    }

    #[test]
    fn test_index_method_defaults_to_btree() {
        assert_eq!(IndexMethod::parse("GIN"), IndexMethod::Gin);
        assert_eq!(IndexMethod::parse("spgist"), IndexMethod::SpGist);
        assert_eq!(IndexMethod::parse("bloom"), IndexMethod::BTree);
        assert_eq!(IndexMethod::default(), IndexMethod::BTree);
    }

    #[test]
    fn test_primary_index_is_not_creatable() {
        let mut table = sample_table();
        table.indexes = vec![
            Index {
                name: "orders_pkey".into(),
                table: "orders".into(),
                columns: vec!["id".into()],
                include_columns: vec![],
                predicate: None,
                is_unique: true,
                is_primary: true,
                method: IndexMethod::BTree,
            },
            Index {
                name: "orders_total_idx".into(),
                table: "orders".into(),
                columns: vec!["total".into()],
                include_columns: vec![],
                predicate: None,
                is_unique: false,
                is_primary: false,
                method: IndexMethod::BTree,
            },
        ];
        let names: Vec<_> = table.creatable_indexes().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["orders_total_idx"]);
    }
}
