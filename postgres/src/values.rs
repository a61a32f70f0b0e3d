//! Parameter binding for engine values.

use bytes::BytesMut;
use crudql_core::Value;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio_postgres::types::{IsNull, ToSql, Type};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Borrowed [`Value`] bound as a PostgreSQL parameter.
///
/// The server infers each parameter's type from the statement, so scalars are narrowed or
/// widened to the declared type before encoding.
#[derive(Debug, Clone, Copy)]
pub struct PgValue<'a>(pub &'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => bind_int(*i, ty, out),
            Value::Float(f) => bind_float(*f, ty, out),
            Value::Numeric(d) => bind_numeric(d, ty, out),
            Value::Text(s) => s.as_str().to_sql(ty, out),
            Value::Date(d) => d.to_sql(ty, out),
            Value::Time(t) => t.to_sql(ty, out),
            Value::Timestamp(ts) => ts.to_sql(ty, out),
            Value::TimestampTz(ts) => ts.to_sql(ty, out),
            Value::Uuid(u) => u.to_sql(ty, out),
            Value::Json(json) => json.to_sql(ty, out),
            Value::Record(_) | Value::Records(_) => {
                Err("embedded records cannot be bound as parameters".into())
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Checked per value in `to_sql`
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn bind_int(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(i).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => i.to_string().to_sql(ty, out),
        _ => i.to_sql(ty, out),
    }
}

fn bind_float(f: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        Type::NUMERIC => Decimal::from_f64(f)
            .ok_or_else(|| format!("{f} is not representable as numeric"))?
            .to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => f.to_string().to_sql(ty, out),
        _ => f.to_sql(ty, out),
    }
}

fn bind_numeric(d: &Decimal, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    use rust_decimal::prelude::ToPrimitive;

    match *ty {
        Type::FLOAT4 | Type::FLOAT8 => d
            .to_f64()
            .ok_or_else(|| format!("{d} is not representable as a float"))?
            .to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => d.to_string().to_sql(ty, out),
        _ => d.to_sql(ty, out),
    }
}
