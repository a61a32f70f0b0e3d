//! Row decoding into engine [`Row`]s.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use crudql_core::{QueryError, Result, Row, Value};
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSql, Type};
use uuid::Uuid;

/// Decodes every column of a driver row, keeping the statement's column order.
pub fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name(), decode_cell(row, index, column.type_())?);
    }
    Ok(out)
}

fn decode_cell(row: &tokio_postgres::Row, index: usize, ty: &Type) -> Result<Value> {
    Ok(match *ty {
        Type::BOOL => get::<bool>(row, index)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, index)?.map(Value::from),
        Type::INT4 => get::<i32>(row, index)?.map(Value::from),
        Type::INT8 => get::<i64>(row, index)?.map(Value::Int),
        Type::FLOAT4 => get::<f32>(row, index)?.map(|f| Value::Float(f64::from(f))),
        Type::FLOAT8 => get::<f64>(row, index)?.map(Value::Float),
        Type::NUMERIC => get::<Decimal>(row, index)?.map(Value::Numeric),
        Type::DATE => get::<NaiveDate>(row, index)?.map(Value::Date),
        Type::TIME => get::<NaiveTime>(row, index)?.map(Value::Time),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, index)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, index)?.map(Value::TimestampTz),
        Type::UUID => get::<Uuid>(row, index)?.map(Value::Uuid),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, index)?.map(Value::Json),
        _ => get::<String>(row, index)?.map(Value::Text),
    }
    .unwrap_or(Value::Null))
}

fn get<'r, T: FromSql<'r>>(row: &'r tokio_postgres::Row, index: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(index).map_err(|e| {
        let name = row.columns().get(index).map(|c| c.name()).unwrap_or("?");
        QueryError::Execution(format!("cannot decode column {name}: {e}"))
    })
}
