use sqlx::PgPool;

pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "_migrations" (
            "id" SERIAL PRIMARY KEY,
            "name" TEXT NOT NULL UNIQUE,
            "applied_at" TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(MigrationError::Sqlx)?;

    let applied: Vec<String> =
        sqlx::query_scalar(r#"SELECT "name" FROM "_migrations" ORDER BY "id""#)
            .fetch_all(pool)
            .await
            .map_err(MigrationError::Sqlx)?;

    let migrations = [(
        "001_practice_engine",
        include_str!("../../sql/001_practice_engine.sql"),
    )];

    for (name, sql) in migrations {
        if applied.iter().any(|done| done == name) {
            tracing::debug!(migration = name, "already applied");
            continue;
        }

        let mut tx = pool.begin().await.map_err(MigrationError::Sqlx)?;
        for statement in split_statements(sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|source| MigrationError::Statement {
                    migration: name.to_string(),
                    source,
                })?;
        }
        sqlx::query(r#"INSERT INTO "_migrations" ("name") VALUES ($1)"#)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(MigrationError::Sqlx)?;
        tx.commit().await.map_err(MigrationError::Sqlx)?;

        tracing::info!(migration = name, "applied migration");
    }

    Ok(())
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|statement| statement.trim().to_string())
        .filter(|statement| !statement.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration {migration} failed: {source}")]
    Statement {
        migration: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_drops_comments_and_blank_statements() {
        let sql = "-- header\nCREATE TABLE a (id INT);\n\n-- note\nCREATE INDEX b ON a (id);\n";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[1].starts_with("CREATE INDEX"));
    }
}
