//! Postgres-backed student store

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::import::row::{CodeBook, ValidRow};

use super::{GroupDirectory, PersistError, StudentStore, UpsertOutcome};

/// Production implementation of both collaborator traits over sqlx.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx(err: sqlx::Error) -> PersistError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
            PersistError::Conflict(db.message().to_string())
        },
        _ => PersistError::Store(err.to_string()),
    }
}

#[async_trait]
impl StudentStore for PostgresStore {
    async fn upsert_by_external_id(&self, row: &ValidRow) -> Result<UpsertOutcome, PersistError> {
        match &row.external_id {
            Some(external_id) => {
                // xmax = 0 distinguishes a fresh insert from a conflict update.
                let (id, created): (Uuid, bool) = sqlx::query_as(
                    r#"
                    INSERT INTO students
                        (id, external_id, first_name, last_name, class_group_id, year_group_id, guardian_email)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (external_id) DO UPDATE SET
                        first_name = EXCLUDED.first_name,
                        last_name = EXCLUDED.last_name,
                        class_group_id = EXCLUDED.class_group_id,
                        year_group_id = EXCLUDED.year_group_id,
                        guardian_email = EXCLUDED.guardian_email,
                        updated_at = now()
                    RETURNING id, (xmax = 0)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(external_id)
                .bind(&row.first_name)
                .bind(&row.last_name)
                .bind(row.class_group_id)
                .bind(row.year_group_id)
                .bind(&row.guardian_email)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;

                Ok(UpsertOutcome { id, created })
            },
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO students
                        (id, external_id, first_name, last_name, class_group_id, year_group_id, guardian_email)
                    VALUES ($1, NULL, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(id)
                .bind(&row.first_name)
                .bind(&row.last_name)
                .bind(row.class_group_id)
                .bind(row.year_group_id)
                .bind(&row.guardian_email)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;

                Ok(UpsertOutcome { id, created: true })
            },
        }
    }
}

#[async_trait]
impl GroupDirectory for PostgresStore {
    async fn load_code_book(&self) -> Result<CodeBook, PersistError> {
        let class_groups: Vec<(String, Uuid)> =
            sqlx::query_as("SELECT label, id FROM class_groups")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;

        let year_groups: Vec<(String, Uuid)> = sqlx::query_as("SELECT label, id FROM year_groups")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(CodeBook {
            class_groups: class_groups.into_iter().collect(),
            year_groups: year_groups.into_iter().collect(),
        })
    }
}
