use chrono::NaiveDate;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::{QueryAs, QueryScalar};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    U64(u64),
    String(String),
    Date(NaiveDate),
}

/// ===============================
/// Dynamic WHERE clause
/// ===============================
/// Clauses are joined with `AND`; every `?` in a clause has a matching
/// value in `values`, in order.
#[derive(Debug, Default)]
pub struct SqlWhere {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlWhere {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(self, clause: &str, value: SqlValue) -> Self {
        self.and_all(clause, [value])
    }

    /// A clause with several placeholders.
    pub fn and_all(mut self, clause: &str, values: impl IntoIterator<Item = SqlValue>) -> Self {
        self.clauses.push(clause.to_string());
        self.values.extend(values);
        self
    }

    pub fn and_opt<T>(self, clause: &str, value: Option<T>, to_sql: impl FnOnce(T) -> SqlValue) -> Self {
        match value {
            Some(v) => self.and(clause, to_sql(v)),
            None => self,
        }
    }

    /// `column IN (?, ...)`; an empty list matches nothing.
    pub fn and_in(mut self, column: &str, ids: &[u64]) -> Self {
        if ids.is_empty() {
            self.clauses.push("1 = 0".to_string());
            return self;
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.clauses.push(format!("{column} IN ({placeholders})"));
        self.values.extend(ids.iter().copied().map(SqlValue::U64));
        self
    }

    pub fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// ===============================
/// Bind values in order
/// ===============================
pub fn bind_as<'q, O>(
    mut query: QueryAs<'q, MySql, O, MySqlArguments>,
    values: &[SqlValue],
) -> QueryAs<'q, MySql, O, MySqlArguments> {
    for value in values.iter().cloned() {
        query = match value {
            SqlValue::U64(v) => query.bind(v),
            SqlValue::String(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
        };
    }
    query
}

pub fn bind_scalar<'q, O>(
    mut query: QueryScalar<'q, MySql, O, MySqlArguments>,
    values: &[SqlValue],
) -> QueryScalar<'q, MySql, O, MySqlArguments> {
    for value in values.iter().cloned() {
        query = match value {
            SqlValue::U64(v) => query.bind(v),
            SqlValue::String(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
        };
    }
    query
}
