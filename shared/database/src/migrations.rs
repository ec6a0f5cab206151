use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use lesprivate_auth::PasswordService;
use lesprivate_common::{AppError, SubscriptionInterval};

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_migrations(&self) -> Result<(), AppError> {
        tracing::info!("Starting database migrations...");
        crate::run_migrations(&self.pool).await?;
        tracing::info!("All migrations completed successfully");
        Ok(())
    }

    pub async fn check_migration_status(&self) -> Result<MigrationStatus, AppError> {
        let migrator = sqlx::migrate!("./migrations");
        let applied: i64 = match sqlx::query_scalar(
            "SELECT COUNT(*) FROM _sqlx_migrations WHERE success",
        )
        .fetch_one(&self.pool)
        .await
        {
            Ok(count) => count,
            // Fresh database: the bookkeeping table does not exist yet.
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => 0,
            Err(e) => return Err(e.into()),
        };

        let total = migrator.iter().count();
        let applied = applied as usize;
        let pending = total.saturating_sub(applied);

        Ok(MigrationStatus {
            total,
            applied,
            pending,
            is_up_to_date: pending == 0,
        })
    }

    /// Subscription catalog and the base course categories. Safe to rerun.
    pub async fn seed_initial_data(&self) -> Result<(), AppError> {
        let prices = [
            ("Premium", SubscriptionInterval::Monthly, 1, Decimal::new(99_000, 0)),
            ("Premium", SubscriptionInterval::Yearly, 1, Decimal::new(990_000, 0)),
        ];

        for (name, interval, count, amount) in prices {
            sqlx::query(
                r#"
                INSERT INTO subscription_prices (id, name, billing_interval, interval_count, amount)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (name, billing_interval) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(interval)
            .bind(count)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        }

        let categories = ["Mathematics", "Science", "Languages", "Music", "Programming"];
        for name in categories {
            sqlx::query(
                "INSERT INTO course_categories (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .execute(&self.pool)
            .await?;
        }

        tracing::info!("Seeded subscription prices and course categories");
        Ok(())
    }

    pub async fn seed_admin(&self, email: &str, password: &str) -> Result<(), AppError> {
        let admin_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        if admin_exists {
            return Ok(());
        }

        PasswordService::validate_password_strength(password)?;
        let password_hash = PasswordService::hash_password(password)?;
        let user_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, verified_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind("Administrator")
        .bind(password_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, 'admin')")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Admin user created");
        Ok(())
    }
}

#[derive(Debug)]
pub struct MigrationStatus {
    pub total: usize,
    pub applied: usize,
    pub pending: usize,
    pub is_up_to_date: bool,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Migrations: {}/{} applied, {} pending",
            self.applied, self.total, self.pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        let status = MigrationStatus {
            total: 5,
            applied: 3,
            pending: 2,
            is_up_to_date: false,
        };
        assert_eq!(status.to_string(), "Migrations: 3/5 applied, 2 pending");
    }
}
