use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use uuid::Uuid;

use crate::{AppError, RedisConfig};

/// Thin Redis handle. Nothing stored here is needed for correctness.
#[derive(Clone)]
pub struct RedisService {
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        let client = Client::open(config.connection_string())?;

        let mut attempt = 0;
        let manager = loop {
            match ConnectionManager::new(client.clone()).await {
                Ok(manager) => break manager,
                Err(e) if attempt < config.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Redis connection failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * (1u64 << attempt.min(5)))).await;
                }
                Err(e) => return Err(AppError::Redis(e)),
            }
        };

        let service = Self { manager };
        service.health_check().await?;

        tracing::info!("Redis connection established");
        Ok(service)
    }

    pub async fn record_course_view(&self, course_id: Uuid) -> Result<i64, AppError> {
        let mut conn = self.manager.clone();
        let views: i64 = conn.incr(RedisKeys::course_views(course_id), 1).await?;
        Ok(views)
    }

    pub async fn course_views(&self, course_id: Uuid) -> Result<i64, AppError> {
        let mut conn = self.manager.clone();
        let views: Option<i64> = conn.get(RedisKeys::course_views(course_id)).await?;
        Ok(views.unwrap_or(0))
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

pub struct RedisKeys;

impl RedisKeys {
    pub fn course_views(course_id: Uuid) -> String {
        format!("course_views:{}", course_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_keys_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(
            RedisKeys::course_views(id),
            "course_views:00000000-0000-0000-0000-000000000000"
        );
    }
}
