use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Untyped row / criteria representation shared by the gateway and the
/// entity mapping: field name to JSON value.
pub type Mapping = serde_json::Map<String, Value>;

/// Row-level access to the users table. Criteria are field = value
/// equality mappings; `select(None)` returns every row.
#[async_trait]
pub trait TableGateway: Send + Sync {
    async fn select(&self, criteria: Option<&Mapping>) -> anyhow::Result<Vec<Mapping>>;
    async fn insert(&self, data: &Mapping) -> anyhow::Result<()>;
    async fn update(&self, data: &Mapping, criteria: &Mapping) -> anyhow::Result<()>;
    async fn delete(&self, criteria: &Mapping) -> anyhow::Result<()>;
}

const TABLE: &str = "users";
const COLUMNS: [&str; 7] = [
    "id",
    "username",
    "email",
    "password",
    "role",
    "created_at",
    "active",
];
const SELECT_COLUMNS: &str = "id, username, email, password, role, created_at, active";

fn check_columns(mapping: &Mapping) -> anyhow::Result<()> {
    for key in mapping.keys() {
        anyhow::ensure!(
            COLUMNS.contains(&key.as_str()),
            "unknown users column: {key}"
        );
    }
    Ok(())
}

fn as_id(value: &Value) -> anyhow::Result<i64> {
    match value {
        Value::Number(n) => n.as_i64().context("id out of range"),
        Value::String(s) => s.parse::<i64>().context("id is not an integer"),
        other => anyhow::bail!("id cannot be bound from {other}"),
    }
}

fn as_text(value: &Value) -> anyhow::Result<Option<String>> {
    match value {
        Value::String(s) => Ok(Some(s.clone())),
        Value::Null => Ok(None),
        other => anyhow::bail!("text column cannot be bound from {other}"),
    }
}

fn as_flag(value: &Value) -> anyhow::Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => anyhow::bail!("boolean column cannot be bound from {other}"),
    }
}

/// Postgres implementation over the `users` table. Storage owns id
/// assignment (BIGSERIAL), the created_at default and the username
/// UNIQUE constraint; see migrations/.
#[derive(Clone)]
pub struct UsersTable {
    pool: PgPool,
}

impl UsersTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_bound(
        builder: &mut QueryBuilder<'_, Postgres>,
        column: &str,
        value: &Value,
    ) -> anyhow::Result<()> {
        match column {
            "id" => builder.push_bind(as_id(value)?),
            "active" => builder.push_bind(as_flag(value)?),
            "username" | "email" | "password" | "role" => builder.push_bind(as_text(value)?),
            other => anyhow::bail!("column {other} cannot be bound"),
        };
        Ok(())
    }

    fn push_where(
        builder: &mut QueryBuilder<'_, Postgres>,
        criteria: &Mapping,
    ) -> anyhow::Result<()> {
        builder.push(" WHERE ");
        for (i, (column, value)) in criteria.iter().enumerate() {
            if i > 0 {
                builder.push(" AND ");
            }
            builder.push(column.as_str()).push(" = ");
            Self::push_bound(builder, column, value)?;
        }
        Ok(())
    }

    fn row_to_mapping(row: &PgRow) -> anyhow::Result<Mapping> {
        let mut mapping = Mapping::new();
        mapping.insert("id".into(), Value::from(row.try_get::<i64, _>("id")?));
        mapping.insert(
            "username".into(),
            Value::from(row.try_get::<String, _>("username")?),
        );
        mapping.insert(
            "email".into(),
            row.try_get::<Option<String>, _>("email")?
                .map_or(Value::Null, Value::from),
        );
        mapping.insert(
            "password".into(),
            Value::from(row.try_get::<String, _>("password")?),
        );
        mapping.insert("role".into(), Value::from(row.try_get::<String, _>("role")?));
        let created_at: OffsetDateTime = row.try_get("created_at")?;
        mapping.insert(
            "created_at".into(),
            Value::from(created_at.format(&Rfc3339).context("format created_at")?),
        );
        mapping.insert(
            "active".into(),
            Value::from(row.try_get::<bool, _>("active")?),
        );
        Ok(mapping)
    }
}

#[async_trait]
impl TableGateway for UsersTable {
    async fn select(&self, criteria: Option<&Mapping>) -> anyhow::Result<Vec<Mapping>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {SELECT_COLUMNS} FROM {TABLE}"));
        if let Some(criteria) = criteria.filter(|c| !c.is_empty()) {
            check_columns(criteria)?;
            Self::push_where(&mut builder, criteria)?;
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("select from users")?;
        rows.iter().map(Self::row_to_mapping).collect()
    }

    async fn insert(&self, data: &Mapping) -> anyhow::Result<()> {
        anyhow::ensure!(!data.is_empty(), "refusing to insert an empty row");
        check_columns(data)?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("INSERT INTO {TABLE} ("));
        for (i, column) in data.keys().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(column.as_str());
        }
        builder.push(") VALUES (");
        for (i, (column, value)) in data.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            Self::push_bound(&mut builder, column, value)?;
        }
        builder.push(")");

        builder
            .build()
            .execute(&self.pool)
            .await
            .context("insert into users")?;
        Ok(())
    }

    async fn update(&self, data: &Mapping, criteria: &Mapping) -> anyhow::Result<()> {
        anyhow::ensure!(!data.is_empty(), "refusing to update with no columns");
        anyhow::ensure!(!criteria.is_empty(), "refusing to update without criteria");
        check_columns(data)?;
        check_columns(criteria)?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {TABLE} SET "));
        for (i, (column, value)) in data.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(column.as_str()).push(" = ");
            Self::push_bound(&mut builder, column, value)?;
        }
        Self::push_where(&mut builder, criteria)?;

        builder
            .build()
            .execute(&self.pool)
            .await
            .context("update users")?;
        Ok(())
    }

    async fn delete(&self, criteria: &Mapping) -> anyhow::Result<()> {
        anyhow::ensure!(!criteria.is_empty(), "refusing to delete without criteria");
        check_columns(criteria)?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("DELETE FROM {TABLE}"));
        Self::push_where(&mut builder, criteria)?;

        builder
            .build()
            .execute(&self.pool)
            .await
            .context("delete users")?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInner {
    rows: Vec<Mapping>,
    next_id: i64,
}

/// In-memory gateway mirroring the users schema (id assignment,
/// created_at default, NOT NULL / UNIQUE username). Backs unit tests and
/// `AppState::fake()`.
#[derive(Default)]
pub struct MemoryTable {
    inner: Mutex<MemoryInner>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(row: &Mapping, criteria: &Mapping) -> bool {
    criteria.iter().all(|(key, value)| row.get(key) == Some(value))
}

#[async_trait]
impl TableGateway for MemoryTable {
    async fn select(&self, criteria: Option<&Mapping>) -> anyhow::Result<Vec<Mapping>> {
        if let Some(criteria) = criteria {
            check_columns(criteria)?;
        }
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .filter(|row| criteria.map_or(true, |c| matches(row, c)))
            .cloned()
            .collect())
    }

    async fn insert(&self, data: &Mapping) -> anyhow::Result<()> {
        anyhow::ensure!(!data.is_empty(), "refusing to insert an empty row");
        check_columns(data)?;
        let mut inner = self.inner.lock().await;

        match data.get("username") {
            None | Some(Value::Null) => anyhow::bail!(
                "null value in column \"username\" violates not-null constraint"
            ),
            Some(name) => {
                if inner.rows.iter().any(|row| row.get("username") == Some(name)) {
                    anyhow::bail!(
                        "duplicate key value violates unique constraint \"users_username_key\""
                    );
                }
            }
        }

        let mut row = data.clone();
        inner.next_id += 1;
        row.insert("id".into(), Value::from(inner.next_id));
        if !row.contains_key("created_at") {
            let now = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .context("format created_at")?;
            row.insert("created_at".into(), Value::from(now));
        }
        row.entry("role").or_insert_with(|| Value::from("user"));
        row.entry("active").or_insert(Value::Bool(true));
        inner.rows.push(row);
        Ok(())
    }

    async fn update(&self, data: &Mapping, criteria: &Mapping) -> anyhow::Result<()> {
        anyhow::ensure!(!data.is_empty(), "refusing to update with no columns");
        anyhow::ensure!(!criteria.is_empty(), "refusing to update without criteria");
        check_columns(data)?;
        check_columns(criteria)?;
        let mut inner = self.inner.lock().await;
        if let Some(name) = data.get("username") {
            if name.is_null() {
                anyhow::bail!(
                    "null value in column \"username\" violates not-null constraint"
                );
            }
            // Rows outside the criteria keep their claim on the name.
            if inner
                .rows
                .iter()
                .any(|row| !matches(row, criteria) && row.get("username") == Some(name))
            {
                anyhow::bail!(
                    "duplicate key value violates unique constraint \"users_username_key\""
                );
            }
        }
        for row in inner.rows.iter_mut().filter(|row| matches(row, criteria)) {
            for (key, value) in data {
                row.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, criteria: &Mapping) -> anyhow::Result<()> {
        anyhow::ensure!(!criteria.is_empty(), "refusing to delete without criteria");
        check_columns(criteria)?;
        let mut inner = self.inner.lock().await;
        inner.rows.retain(|row| !matches(row, criteria));
        Ok(())
    }
}
