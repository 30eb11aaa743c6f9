use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use diesel::backend::Backend;
use diesel::deserialize;
use diesel::serialize::Output;
use diesel::sql_types::Text;
use diesel::types::{FromSql, ToSql};

/// Exact decimal amount persisted as TEXT. SQLite has no decimal affinity,
/// so the canonical string form is the stored representation.
#[derive(
    AsExpression, FromSqlRow, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sql_type = "Text"]
pub struct BigDecimalField(pub BigDecimal);

impl Deref for BigDecimalField {
    type Target = BigDecimal;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for BigDecimalField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<BigDecimal> for BigDecimalField {
    fn from(value: BigDecimal) -> Self {
        BigDecimalField(value)
    }
}

impl From<BigDecimalField> for BigDecimal {
    fn from(value: BigDecimalField) -> Self {
        value.0
    }
}

impl FromStr for BigDecimalField {
    type Err = bigdecimal::ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BigDecimalField(BigDecimal::from_str(s)?))
    }
}

impl<DB: Backend> ToSql<Text, DB> for BigDecimalField
where
    String: ToSql<Text, DB>,
{
    fn to_sql<W: std::io::Write>(&self, out: &mut Output<W, DB>) -> diesel::serialize::Result {
        self.0.to_string().to_sql(out)
    }
}

impl<DB> FromSql<Text, DB> for BigDecimalField
where
    DB: Backend,
    String: FromSql<Text, DB>,
{
    fn from_sql(bytes: Option<&DB::RawValue>) -> deserialize::Result<Self> {
        let text = String::from_sql(bytes)?;
        Ok(BigDecimalField(BigDecimal::from_str(&text)?))
    }
}
