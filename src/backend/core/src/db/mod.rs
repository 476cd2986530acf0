//! Database layer for Warden.
//!
//! Uses PostgreSQL for persistent storage with sqlx. Policy rules live in the
//! conventional `casbin_rule` table; every row this crate touches has
//! `ptype = 'p'` and uses only `v0` (role), `v1` (path) and `v2` (method).

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{Result, WardenError};
use crate::rbac::models::{PolicyColumn, PolicyFilter, PolicyRule};
use crate::rbac::store::{first_duplicate, PolicyStore};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| WardenError::store("connect", e))?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connected to policy database"
        );
        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| WardenError::store("migrate", e))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn policy_store(&self) -> PgPolicyStore {
        PgPolicyStore::new(self.pool.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    v0: String,
    v1: String,
    v2: String,
}

impl From<RuleRow> for PolicyRule {
    fn from(row: RuleRow) -> Self {
        PolicyRule::new(row.v0, row.v1, row.v2)
    }
}

/// [`PolicyStore`] over the `casbin_rule` table.
#[derive(Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations become `DuplicateRule`; everything else is the store
/// being unavailable for `operation`.
fn classify(operation: &'static str, err: sqlx::Error) -> WardenError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return WardenError::duplicate(db_err.message().to_string());
        }
    }
    WardenError::store(operation, err)
}

fn insert_query(rules: &[PolicyRule]) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("INSERT INTO casbin_rule (ptype, v0, v1, v2) ");
    query.push_values(rules, |mut row, rule| {
        row.push_bind("p")
            .push_bind(rule.subject.clone())
            .push_bind(rule.object.clone())
            .push_bind(rule.action.clone());
    });
    query
}

fn push_predicate<'a, I>(query: &mut QueryBuilder<'static, Postgres>, constraints: I)
where
    I: IntoIterator<Item = (PolicyColumn, &'a str)>,
{
    query.push(" WHERE ptype = 'p'");
    for (column, value) in constraints {
        query
            .push(" AND ")
            .push(column.column_name())
            .push(" = ")
            .push_bind(value.to_string());
    }
}

fn delete_query(filter: &PolicyFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("DELETE FROM casbin_rule");
    push_predicate(&mut query, filter.constraints());
    query
}

fn update_query(
    predicate: &[(PolicyColumn, String)],
    updates: &[(PolicyColumn, String)],
) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("UPDATE casbin_rule SET ");
    {
        let mut set = query.separated(", ");
        for (column, value) in updates {
            set.push(column.column_name())
                .push_unseparated(" = ")
                .push_bind_unseparated(value.clone());
        }
    }
    push_predicate(
        &mut query,
        predicate.iter().map(|(column, value)| (*column, value.as_str())),
    );
    query
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn load_all(&self) -> Result<Vec<PolicyRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT v0, v1, v2
            FROM casbin_rule
            WHERE ptype = 'p'
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify("load_all", e))?;

        Ok(rows.into_iter().map(PolicyRule::from).collect())
    }

    async fn insert_many(&self, rules: &[PolicyRule]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        if let Some(dup) = first_duplicate(rules) {
            return Err(WardenError::duplicate(dup.to_string()));
        }

        insert_query(rules)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| classify("insert_many", e))?;

        debug!(inserted = rules.len(), "Inserted policy rules");
        Ok(())
    }

    async fn delete_where(&self, filter: &PolicyFilter) -> Result<bool> {
        let result = delete_query(filter)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| classify("delete_where", e))?;

        debug!(removed = result.rows_affected(), column = %filter.column(), "Deleted policy rules");
        Ok(result.rows_affected() > 0)
    }

    async fn update_where(
        &self,
        predicate: &[(PolicyColumn, String)],
        updates: &[(PolicyColumn, String)],
    ) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let result = update_query(predicate, updates)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| classify("update_where", e))?;

        Ok(result.rows_affected())
    }

    async fn replace_subject(&self, subject: &str, rules: &[PolicyRule]) -> Result<()> {
        if let Some(dup) = first_duplicate(rules) {
            return Err(WardenError::duplicate(dup.to_string()));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify("replace_subject", e))?;

        sqlx::query("DELETE FROM casbin_rule WHERE ptype = 'p' AND v0 = $1")
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify("replace_subject", e))?;

        if !rules.is_empty() {
            insert_query(rules)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| classify("replace_subject", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| classify("replace_subject", e))?;

        debug!(subject, rules = rules.len(), "Replaced subject rules");
        Ok(())
    }
}
