//! SQLite implementation of the tenant [`Backend`].
//!
//! Compiles a [`TenantQuery`] into one parameterised statement. Identifiers
//! were validated by the builder and are quoted here; values always travel
//! as bound parameters.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::tenant::query::Operation;
use crate::tenant::{
    Backend, BackendError, Filter, GuardianLink, QueryOutput, Row, Tenant, TenantQuery, TenantStatus,
    UserRecord,
};

pub struct SqliteBackend<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteBackend<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

#[derive(Debug, Default)]
struct Statement {
    sql: String,
    params: Vec<SqlValue>,
}

impl Statement {
    fn push_filter(&mut self, filter: &Filter) {
        match filter {
            Filter::Eq { column, value } if value.is_null() => {
                self.sql.push_str(&format!("{} IS NULL", quote(column)));
            }
            Filter::Neq { column, value } if value.is_null() => {
                self.sql.push_str(&format!("{} IS NOT NULL", quote(column)));
            }
            Filter::Eq { column, value } => self.compare(column, "=", value),
            Filter::Neq { column, value } => self.compare(column, "<>", value),
            Filter::Gt { column, value } => self.compare(column, ">", value),
            Filter::Gte { column, value } => self.compare(column, ">=", value),
            Filter::Lt { column, value } => self.compare(column, "<", value),
            Filter::Lte { column, value } => self.compare(column, "<=", value),
            Filter::In { column, values } => {
                if values.is_empty() {
                    // Nothing can be a member of the empty set.
                    self.sql.push('0');
                    return;
                }
                let marks = vec!["?"; values.len()].join(", ");
                self.sql.push_str(&format!("{} IN ({marks})", quote(column)));
                self.params.extend(values.iter().map(to_sql));
            }
            Filter::Like { column, pattern } => {
                self.sql.push_str(&format!("{} LIKE ?", quote(column)));
                self.params.push(SqlValue::Text(pattern.clone()));
            }
            Filter::Ilike { column, pattern } => {
                self.sql.push_str(&format!("LOWER({}) LIKE LOWER(?)", quote(column)));
                self.params.push(SqlValue::Text(pattern.clone()));
            }
            Filter::IsNull { column } => self.sql.push_str(&format!("{} IS NULL", quote(column))),
            Filter::NotNull { column } => self.sql.push_str(&format!("{} IS NOT NULL", quote(column))),
            Filter::Or { filters } => self.push_group(filters, " OR "),
            Filter::And { filters } => self.push_group(filters, " AND "),
        }
    }

    fn compare(&mut self, column: &str, op: &str, value: &Value) {
        self.sql.push_str(&format!("{} {op} ?", quote(column)));
        self.params.push(to_sql(value));
    }

    fn push_group(&mut self, filters: &[Filter], joiner: &str) {
        self.sql.push('(');
        for (i, f) in filters.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(joiner);
            }
            self.push_filter(f);
        }
        self.sql.push(')');
    }

    fn push_where(&mut self, filters: &[Filter]) {
        if filters.is_empty() {
            return;
        }
        self.sql.push_str(" WHERE ");
        for (i, f) in filters.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(" AND ");
            }
            self.push_filter(f);
        }
    }
}

fn compile_read(query: &TenantQuery, columns: &[String]) -> Statement {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
    };
    let mut stmt = Statement {
        sql: format!("SELECT {projection} FROM {}", quote(query.table())),
        params: Vec::new(),
    };
    stmt.push_where(query.filters());
    if !query.ordering().is_empty() {
        let order = query
            .ordering()
            .iter()
            .map(|o| format!("{} {}", quote(&o.column), if o.ascending { "ASC" } else { "DESC" }))
            .collect::<Vec<_>>()
            .join(", ");
        stmt.sql.push_str(&format!(" ORDER BY {order}"));
    }
    let (limit, offset) = query.window();
    if limit.is_some() || offset.is_some() {
        stmt.sql.push_str(" LIMIT ? OFFSET ?");
        stmt.params
            .push(SqlValue::Integer(limit.map(to_sql_count).unwrap_or(-1)));
        stmt.params
            .push(SqlValue::Integer(offset.map(to_sql_count).unwrap_or(0)));
    }
    stmt
}

/// The builder rejects windows past `i64::MAX`; saturate rather than wrap.
fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn compile_insert(table: &str, row: &Row) -> Statement {
    let columns: Vec<String> = row.keys().map(|k| quote(k)).collect();
    let marks = vec!["?"; columns.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({marks}) RETURNING *",
            quote(table),
            columns.join(", ")
        ),
        params: row.values().map(to_sql).collect(),
    }
}

fn compile_update(query: &TenantQuery, patch: &Row) -> Statement {
    let sets = patch
        .keys()
        .map(|k| format!("{} = ?", quote(k)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = Statement {
        sql: format!("UPDATE {} SET {sets}", quote(query.table())),
        params: patch.values().map(to_sql).collect(),
    };
    stmt.push_where(query.filters());
    stmt.sql.push_str(" RETURNING *");
    stmt
}

fn compile_delete(query: &TenantQuery) -> Statement {
    let mut stmt = Statement {
        sql: format!("DELETE FROM {}", quote(query.table())),
        params: Vec::new(),
    };
    stmt.push_where(query.filters());
    stmt.sql.push_str(" RETURNING *");
    stmt
}

fn run(conn: &Connection, stmt: &Statement) -> Result<Vec<Row>, rusqlite::Error> {
    let mut prepared = conn.prepare(&stmt.sql)?;
    let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
    let rows = prepared
        .query_map(params_from_iter(stmt.params.iter()), |r| {
            let mut row = Row::new();
            for (i, name) in names.iter().enumerate() {
                row.insert(name.clone(), from_sql(r.get_ref(i)?));
            }
            Ok(row)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl Backend for SqliteBackend<'_> {
    fn execute(&self, query: &TenantQuery) -> Result<QueryOutput, BackendError> {
        let rows = match query.operation() {
            None => Vec::new(),
            Some(Operation::Select { columns }) => run(self.conn, &compile_read(query, columns))?,
            Some(Operation::Update { patch }) => run(self.conn, &compile_update(query, patch))?,
            Some(Operation::Delete) => run(self.conn, &compile_delete(query))?,
            Some(Operation::Insert { rows }) => {
                let tx = self.conn.unchecked_transaction()?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.extend(run(&tx, &compile_insert(query.table(), row))?);
                }
                tx.commit()?;
                out
            }
        };
        Ok(QueryOutput { rows })
    }

    fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, BackendError> {
        let tenant = self
            .conn
            .query_row(
                "SELECT id, name, subdomain, status, contact_email, subscription_plan
                 FROM tenants WHERE id = ?",
                [tenant_id],
                |r| {
                    let status: String = r.get(3)?;
                    Ok(Tenant {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        subdomain: r.get(2)?,
                        // Unknown statuses fail closed.
                        status: TenantStatus::parse(&status).unwrap_or(TenantStatus::Inactive),
                        contact_email: r.get(4)?,
                        subscription_plan: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(tenant)
    }

    fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>, BackendError> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, full_name, role_id, tenant_id FROM users WHERE id = ?",
                [user_id],
                |r| {
                    Ok(UserRecord {
                        id: r.get(0)?,
                        email: r.get(1)?,
                        full_name: r.get(2)?,
                        role_id: r.get(3)?,
                        tenant_id: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn role_name(&self, role_id: i64) -> Result<Option<String>, BackendError> {
        let name = self
            .conn
            .query_row("SELECT role_name FROM roles WHERE id = ?", [role_id], |r| r.get(0))
            .optional()?;
        Ok(name)
    }

    fn guardian_links(&self, user_id: &str) -> Result<Vec<GuardianLink>, BackendError> {
        let mut stmt = self.conn.prepare(
            "SELECT g.student_id, s.tenant_id
             FROM guardian_links g
             JOIN students s ON s.id = g.student_id
             WHERE g.user_id = ?
             ORDER BY g.student_id",
        )?;
        let links = stmt
            .query_map([user_id], |r| {
                Ok(GuardianLink {
                    student_id: r.get(0)?,
                    tenant_id: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }
}
