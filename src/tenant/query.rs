//! Tenant-scoped query builder.
//!
//! A [`TenantQuery`] is an immutable description of one database operation
//! bound to one tenant. Starting a read, update or delete places the tenant
//! equality constraint at `filters[0]` before any caller filter can be
//! added, and inserts are stamped row by row. Nothing reaches a backend
//! until [`TenantQuery::execute`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::backend::{Backend, QueryOutput, Row};
use super::error::QueryError;
use super::model::TENANT_COLUMN;

/// Caller-supplied predicate. Serialized form is what IPC clients send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    Gt { column: String, value: Value },
    Gte { column: String, value: Value },
    Lt { column: String, value: Value },
    Lte { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    Like { column: String, pattern: String },
    Ilike { column: String, pattern: String },
    IsNull { column: String },
    NotNull { column: String },
    Or { filters: Vec<Filter> },
    And { filters: Vec<Filter> },
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Neq {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gte {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Lte {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull {
            column: column.to_string(),
        }
    }

    fn tenant(tenant_id: &str) -> Self {
        Filter::eq(TENANT_COLUMN, tenant_id)
    }

    /// True when this is the equality constraint binding `tenant_id`.
    pub fn is_tenant_constraint(&self, tenant_id: &str) -> bool {
        matches!(
            self,
            Filter::Eq { column, value: Value::String(v) } if column == TENANT_COLUMN && v == tenant_id
        )
    }

    fn validate(&self) -> Result<(), QueryError> {
        match self {
            Filter::Eq { column, .. }
            | Filter::Neq { column, .. }
            | Filter::Gt { column, .. }
            | Filter::Gte { column, .. }
            | Filter::Lt { column, .. }
            | Filter::Lte { column, .. }
            | Filter::In { column, .. }
            | Filter::Like { column, .. }
            | Filter::Ilike { column, .. }
            | Filter::IsNull { column }
            | Filter::NotNull { column } => validate_identifier(column),
            Filter::Or { filters } => validate_group("or", filters),
            Filter::And { filters } => validate_group("and", filters),
        }
    }
}

fn validate_group(kind: &'static str, filters: &[Filter]) -> Result<(), QueryError> {
    if filters.is_empty() {
        return Err(QueryError::EmptyGroup(kind));
    }
    filters.iter().try_for_each(Filter::validate)
}

/// Table and column names must be plain SQL identifiers.
pub fn validate_identifier(name: &str) -> Result<(), QueryError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(QueryError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
    /// Empty column list means every column.
    Select { columns: Vec<String> },
    Insert { rows: Vec<Row> },
    Update { patch: Row },
    Delete,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Select { .. } => "select",
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantQuery {
    tenant_id: String,
    table: String,
    operation: Option<Operation>,
    filters: Vec<Filter>,
    order: Vec<Order>,
    limit: Option<usize>,
    range: Option<(usize, usize)>,
    single: bool,
}

impl TenantQuery {
    pub fn new(tenant_id: &str, table: &str) -> Result<Self, QueryError> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(QueryError::MissingTenant);
        }
        let table = table.trim();
        if table.is_empty() {
            return Err(QueryError::MissingTable);
        }
        validate_identifier(table)?;
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            table: table.to_string(),
            operation: None,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            range: None,
            single: false,
        })
    }

    /// `"*"` (or blank) selects every column. An explicit projection always
    /// carries the tenant column so the result can be re-checked.
    pub fn select(self, columns: &str) -> Result<Self, QueryError> {
        self.ensure_unstarted()?;
        let columns = parse_columns(columns)?;
        Ok(self.begin(Operation::Select { columns }))
    }

    /// Every row gets the bound tenant id, whatever the caller put there.
    pub fn insert(self, rows: Vec<Row>) -> Result<Self, QueryError> {
        self.ensure_unstarted()?;
        if rows.is_empty() {
            return Err(QueryError::EmptyInsert { table: self.table });
        }
        let mut stamped = Vec::with_capacity(rows.len());
        for mut row in rows {
            row.keys().try_for_each(|k| validate_identifier(k))?;
            row.insert(
                TENANT_COLUMN.to_string(),
                Value::String(self.tenant_id.clone()),
            );
            stamped.push(row);
        }
        Ok(self.begin(Operation::Insert { rows: stamped }))
    }

    pub fn update(self, mut patch: Row) -> Result<Self, QueryError> {
        self.ensure_unstarted()?;
        patch.keys().try_for_each(|k| validate_identifier(k))?;
        patch.insert(
            TENANT_COLUMN.to_string(),
            Value::String(self.tenant_id.clone()),
        );
        Ok(self.begin(Operation::Update { patch }))
    }

    pub fn delete(self) -> Result<Self, QueryError> {
        self.ensure_unstarted()?;
        Ok(self.begin(Operation::Delete))
    }

    pub fn filter(mut self, filter: Filter) -> Result<Self, QueryError> {
        match &self.operation {
            None => return Err(QueryError::NotStarted { table: self.table }),
            Some(Operation::Insert { .. }) => {
                return Err(QueryError::FiltersNotAllowed {
                    table: self.table,
                    operation: "insert",
                })
            }
            Some(_) => {}
        }
        filter.validate()?;
        self.filters.push(filter);
        Ok(self)
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.filter(Filter::eq(column, value))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.filter(Filter::neq(column, value))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.filter(Filter::Gt {
            column: column.to_string(),
            value: value.into(),
        })
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.filter(Filter::gte(column, value))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.filter(Filter::Lt {
            column: column.to_string(),
            value: value.into(),
        })
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        self.filter(Filter::lte(column, value))
    }

    pub fn in_list<I, V>(self, column: &str, values: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn like(self, column: &str, pattern: &str) -> Result<Self, QueryError> {
        self.filter(Filter::Like {
            column: column.to_string(),
            pattern: pattern.to_string(),
        })
    }

    pub fn ilike(self, column: &str, pattern: &str) -> Result<Self, QueryError> {
        self.filter(Filter::Ilike {
            column: column.to_string(),
            pattern: pattern.to_string(),
        })
    }

    pub fn is_null(self, column: &str) -> Result<Self, QueryError> {
        self.filter(Filter::is_null(column))
    }

    pub fn not_null(self, column: &str) -> Result<Self, QueryError> {
        self.filter(Filter::NotNull {
            column: column.to_string(),
        })
    }

    pub fn or(self, filters: Vec<Filter>) -> Result<Self, QueryError> {
        self.filter(Filter::Or { filters })
    }

    pub fn and(self, filters: Vec<Filter>) -> Result<Self, QueryError> {
        self.filter(Filter::And { filters })
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Result<Self, QueryError> {
        self.ensure_started()?;
        validate_identifier(column)?;
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        Ok(self)
    }

    pub fn limit(mut self, count: usize) -> Result<Self, QueryError> {
        self.ensure_started()?;
        if i64::try_from(count).is_err() {
            return Err(QueryError::InvalidLimit(count));
        }
        self.limit = Some(count);
        Ok(self)
    }

    /// Inclusive row window, `range(0, 9)` is the first ten rows.
    pub fn range(mut self, from: usize, to: usize) -> Result<Self, QueryError> {
        self.ensure_started()?;
        // Both LIMIT and OFFSET are bound as SQLite integers.
        let fits = to >= from
            && i64::try_from(from).is_ok()
            && (to - from)
                .checked_add(1)
                .map(|n| i64::try_from(n).is_ok())
                .unwrap_or(false);
        if !fits {
            return Err(QueryError::InvalidRange { from, to });
        }
        self.range = Some((from, to));
        Ok(self)
    }

    pub fn single(mut self) -> Result<Self, QueryError> {
        self.ensure_started()?;
        self.single = true;
        Ok(self)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[Order] {
        &self.order
    }

    /// `(limit, offset)` after folding `range` over `limit`.
    pub fn window(&self) -> (Option<usize>, Option<usize>) {
        match self.range {
            Some((from, to)) => (Some(to.saturating_sub(from).saturating_add(1)), Some(from)),
            None => (self.limit, None),
        }
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Holds for every started query this builder can produce.
    pub fn is_tenant_scoped(&self) -> bool {
        match &self.operation {
            None => false,
            Some(Operation::Insert { rows }) => rows.iter().all(|r| {
                r.get(TENANT_COLUMN).and_then(Value::as_str) == Some(self.tenant_id.as_str())
            }),
            Some(_) => self
                .filters
                .first()
                .map(|f| f.is_tenant_constraint(&self.tenant_id))
                .unwrap_or(false),
        }
    }

    pub fn execute(&self, backend: &dyn Backend) -> Result<QueryOutput, QueryError> {
        let Some(operation) = &self.operation else {
            return Err(QueryError::NotStarted {
                table: self.table.clone(),
            });
        };
        info!(
            table = %self.table,
            tenant_id = %self.tenant_id,
            operation = operation.name(),
            "executing tenant query"
        );
        let output = match backend.execute(self) {
            Ok(out) => out,
            Err(e) => {
                warn!(table = %self.table, tenant_id = %self.tenant_id, error = %e, "tenant query failed");
                return Err(e.into());
            }
        };
        info!(table = %self.table, rows = output.count(), "tenant query completed");
        if self.single && output.count() != 1 {
            return Err(QueryError::SingleRowExpected {
                table: self.table.clone(),
                count: output.count(),
            });
        }
        Ok(output)
    }

    fn begin(mut self, operation: Operation) -> Self {
        if !matches!(operation, Operation::Insert { .. }) {
            self.filters.insert(0, Filter::tenant(&self.tenant_id));
        }
        self.operation = Some(operation);
        self
    }

    fn ensure_unstarted(&self) -> Result<(), QueryError> {
        match &self.operation {
            Some(op) => Err(QueryError::AlreadyStarted {
                table: self.table.clone(),
                operation: op.name(),
            }),
            None => Ok(()),
        }
    }

    fn ensure_started(&self) -> Result<(), QueryError> {
        if self.operation.is_none() {
            return Err(QueryError::NotStarted {
                table: self.table.clone(),
            });
        }
        Ok(())
    }
}

fn parse_columns(columns: &str) -> Result<Vec<String>, QueryError> {
    let trimmed = columns.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for col in trimmed.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        validate_identifier(col)?;
        if !out.iter().any(|c: &String| c == col) {
            out.push(col.to_string());
        }
    }
    if !out.iter().any(|c| c == TENANT_COLUMN) {
        out.push(TENANT_COLUMN.to_string());
    }
    Ok(out)
}

/// Accepts a single JSON object or an array of objects.
pub fn rows_from_value(table: &str, value: Value) -> Result<Vec<Row>, QueryError> {
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(QueryError::RowNotObject {
                table: table.to_string(),
                index,
            }),
        })
        .collect()
}
