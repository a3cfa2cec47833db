//! Relational schema snapshot, extraction and recreation.

mod creator;
mod extractor;
mod types;

pub use creator::{
    column_definition, column_type, create_foreign_key_sql, create_index_sql, create_schema_sql,
    create_sequence_sql, create_table_sql, guarded_foreign_key_sql, CreationReport,
    SchemaCreator, StatementExecutor,
};
pub use extractor::{parse_index_definition, IndexDefinition, SchemaExtractor};
pub use types::*;
