//! Row values moved between a PostgreSQL source and target of the same schema.
//!
//! Types with a direct driver mapping travel in binary form. Every other type
//! (numeric, arrays, enums, network types, ...) is selected as `::text` and
//! cast back to the column type on insert, so values round-trip without a
//! Rust representation.

use crate::error::{Result, TransferError};
use crate::schema::base_type_name;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::error::Error;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

/// How a column's values are read and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Json,
    /// Copied through its text representation.
    Cast,
}

impl ColumnKind {
    /// Classify a type name as rendered by `format_type`. Modifiers such as
    /// `(20)` or `(3)` do not change the kind.
    pub fn from_type(data_type: &str) -> Self {
        match base_type_name(data_type).as_str() {
            "boolean" => ColumnKind::Bool,
            "smallint" => ColumnKind::I16,
            "integer" => ColumnKind::I32,
            "bigint" => ColumnKind::I64,
            "real" => ColumnKind::F32,
            "double precision" => ColumnKind::F64,
            "text" | "character varying" | "character" => ColumnKind::Text,
            "bytea" => ColumnKind::Bytes,
            "uuid" => ColumnKind::Uuid,
            "timestamp without time zone" => ColumnKind::Timestamp,
            "timestamp with time zone" => ColumnKind::TimestampTz,
            "date" => ColumnKind::Date,
            "time without time zone" => ColumnKind::Time,
            "json" | "jsonb" => ColumnKind::Json,
            _ => ColumnKind::Cast,
        }
    }

    /// Select-list expression for a quoted column.
    pub fn select_expr(&self, quoted: &str) -> String {
        match self {
            ColumnKind::Cast => format!("{}::text", quoted),
            _ => quoted.to_string(),
        }
    }

    /// Placeholder for parameter `n` bound to a column of `data_type`.
    pub fn placeholder(&self, n: usize, data_type: &str) -> String {
        match self {
            ColumnKind::Cast => format!("${}::text::{}", n, data_type),
            _ => format!("${}", n),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I16(v) => v.to_sql(ty, out),
            SqlValue::I32(v) => v.to_sql(ty, out),
            SqlValue::I64(v) => v.to_sql(ty, out),
            SqlValue::F32(v) => v.to_sql(ty, out),
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Bytes(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::TimestampTz(v) => v.to_sql(ty, out),
            SqlValue::Date(v) => v.to_sql(ty, out),
            SqlValue::Time(v) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_sql(ty, out),
        }
    }

    // Source and target share the column types, so the value kind always
    // matches the parameter type the server infers.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn get<'a, T>(row: &'a Row, idx: usize, wrap: fn(T) -> SqlValue) -> Result<SqlValue>
where
    T: FromSql<'a>,
{
    let value: Option<T> = row.try_get(idx).map_err(|e| {
        TransferError::Value(format!(
            "column {} ({}): {}",
            idx,
            row.columns()
                .get(idx)
                .map(|c| c.name())
                .unwrap_or("?"),
            e
        ))
    })?;
    Ok(value.map(wrap).unwrap_or(SqlValue::Null))
}

/// Decode one row using the column kinds of the select list.
pub fn decode_row(row: &Row, kinds: &[ColumnKind]) -> Result<Vec<SqlValue>> {
    kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| match kind {
            ColumnKind::Bool => get(row, idx, SqlValue::Bool),
            ColumnKind::I16 => get(row, idx, SqlValue::I16),
            ColumnKind::I32 => get(row, idx, SqlValue::I32),
            ColumnKind::I64 => get(row, idx, SqlValue::I64),
            ColumnKind::F32 => get(row, idx, SqlValue::F32),
            ColumnKind::F64 => get(row, idx, SqlValue::F64),
            ColumnKind::Text | ColumnKind::Cast => get(row, idx, SqlValue::Text),
            ColumnKind::Bytes => get(row, idx, SqlValue::Bytes),
            ColumnKind::Uuid => get(row, idx, SqlValue::Uuid),
            ColumnKind::Timestamp => get(row, idx, SqlValue::Timestamp),
            ColumnKind::TimestampTz => get(row, idx, SqlValue::TimestampTz),
            ColumnKind::Date => get(row, idx, SqlValue::Date),
            ColumnKind::Time => get(row, idx, SqlValue::Time),
            ColumnKind::Json => get(row, idx, SqlValue::Json),
        })
        .collect()
}
