#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use lesprivate_api::config::{
    ApiConfig, BookingConfig, EmailConfig, EncryptionConfig, GatewayConfig, NotificationConfig,
    SweepConfig,
};
use lesprivate_api::courses::{CoursePayload, PriceTier, ScheduleSlot};
use lesprivate_api::gateways::{
    GatewayError, InvoiceRequest, InvoiceSession, PaymentGateway, RecurringPlan,
    RecurringPlanRequest,
};
use lesprivate_api::AppState;
use lesprivate_common::{ClassType, DatabaseConfig, JwtConfig, RedisConfig, ServerConfig};
use lesprivate_database::{Database, MigrationRunner};

pub const CALLBACK_TOKEN: &str = "test-callback-token";

/// Gateway double that hands out predictable ids and counts calls.
#[derive(Default)]
pub struct MockGateway {
    pub invoices: AtomicUsize,
    pub plans: AtomicUsize,
    pub deactivations: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<InvoiceSession, GatewayError> {
        self.invoices.fetch_add(1, Ordering::SeqCst);
        Ok(InvoiceSession {
            external_id: format!("inv_{}", request.reference_id),
            url: format!("https://checkout.example/{}", request.reference_id),
        })
    }

    async fn create_recurring_plan(
        &self,
        request: &RecurringPlanRequest,
    ) -> Result<RecurringPlan, GatewayError> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        Ok(RecurringPlan {
            plan_id: format!("repl_{}", request.reference_id),
            status: "REQUIRES_ACTION".to_string(),
        })
    }

    async fn deactivate_plan(&self, _plan_id: &str) -> Result<(), GatewayError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestApp {
    pub pool: PgPool,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
}

pub fn test_config() -> ApiConfig {
    let unused_db = DatabaseConfig {
        host: "localhost".to_string(),
        port: 5432,
        username: "lesprivate".to_string(),
        password: "lesprivate".to_string(),
        database: "lesprivate_test".to_string(),
        max_connections: 5,
        max_lifetime_secs: 60,
        timezone: "UTC".to_string(),
    };

    ApiConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["http://localhost:3000".to_string()],
            request_timeout_secs: 30,
        },
        database: unused_db,
        database_read: None,
        enable_migration: true,
        transaction_retries: 3,
        redis: RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            database: 0,
            max_retries: 0,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret".to_string(),
            issuer: "lesprivate".to_string(),
            access_expiration_minutes: 15,
            refresh_expiration_hours: 24,
        },
        gateway: GatewayConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            secret_key: "xnd_test".to_string(),
            callback_token: CALLBACK_TOKEN.to_string(),
            currency: "IDR".to_string(),
            timeout_secs: 2,
            success_redirect_url: "http://localhost:3000/ok".to_string(),
            failure_redirect_url: "http://localhost:3000/failed".to_string(),
        },
        email: EmailConfig {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 1025,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_email: "no-reply@lesprivate.test".to_string(),
            from_name: "Lesprivate".to_string(),
            reply_to: None,
        },
        booking: BookingConfig {
            default_expiration_hours: 24,
            expiry_reminder_minutes: 120,
            course_reminder_minutes: 60,
            review_delay_minutes: 60,
        },
        sweeps: SweepConfig {
            batch_size: 50,
            batch_timeout_secs: 10,
            cron_enabled: false,
            cron_expression: "0 */5 * * * *".to_string(),
        },
        notifications: NotificationConfig {
            retention_days: 30,
            delivery_timeout_secs: 5,
        },
        encryption: EncryptionConfig {
            key: "0123456789abcdef0123456789abcdef".to_string(),
        },
        internal_key: Some("internal-test-key".to_string()),
        app_base_url: "http://localhost:3000".to_string(),
    }
}

pub async fn setup() -> Option<TestApp> {
    // Skip test if no database is available
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            println!("Skipping database test - DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPool::connect(&url).await.expect("Failed to connect to test database");
    MigrationRunner::new(pool.clone())
        .run_all_migrations()
        .await
        .expect("Failed to run migrations");

    let gateway = Arc::new(MockGateway::default());
    let db = Database::new(pool.clone(), None, 3);
    let state = AppState::build(test_config(), db, None, gateway.clone()).expect("state");
    Some(TestApp { pool, state, gateway })
}

pub struct Account {
    pub user_id: Uuid,
    pub profile_id: Uuid,
}

async fn insert_user(pool: &PgPool, name: &str, role: &str) -> Uuid {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, name) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(format!("{}@example.com", user_id))
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
        .bind(user_id)
        .bind(role)
        .execute(pool)
        .await
        .unwrap();
    user_id
}

pub async fn tutor(pool: &PgPool) -> Account {
    let user_id = insert_user(pool, "Tutor Test", "tutor").await;
    let profile_id = Uuid::new_v4();
    sqlx::query("INSERT INTO tutors (id, user_id, latitude, longitude) VALUES ($1, $2, -6.2, 106.8)")
        .bind(profile_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
    Account { user_id, profile_id }
}

pub async fn student(pool: &PgPool) -> Account {
    let user_id = insert_user(pool, "Student Test", "student").await;
    let profile_id = Uuid::new_v4();
    sqlx::query("INSERT INTO students (id, user_id) VALUES ($1, $2)")
        .bind(profile_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
    Account { user_id, profile_id }
}

pub async fn admin(pool: &PgPool) -> Uuid {
    insert_user(pool, "Admin Test", "admin").await
}

pub async fn category(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO course_categories (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("Category {}", id))
        .execute(pool)
        .await
        .unwrap();
    id
}

/// Open every day from 08:00 to 20:00 so any test date is bookable.
pub fn payload(category_id: Uuid, title: &str) -> CoursePayload {
    CoursePayload {
        title: title.to_string(),
        description: "Algebra and geometry".to_string(),
        course_category_id: category_id,
        sub_category_ids: vec![],
        education_levels: vec!["sma".to_string()],
        prices: vec![
            PriceTier {
                duration_minutes: 60,
                price: Decimal::new(150_000, 0),
            },
            PriceTier {
                duration_minutes: 90,
                price: Decimal::new(200_000, 0),
            },
        ],
        schedules: (0..7)
            .map(|weekday| ScheduleSlot {
                weekday,
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            })
            .collect(),
        class_type: ClassType::Online,
        is_free_first_course: false,
        expiration_hours: Some(24),
    }
}

/// Creates, submits and approves a course; returns its id.
pub async fn published_course(app: &TestApp, tutor: &Account, title: &str) -> Uuid {
    let category_id = category(&app.pool).await;
    let admin_id = admin(&app.pool).await;
    let course = app
        .state
        .drafts
        .create(tutor.profile_id, payload(category_id, title))
        .await
        .unwrap();
    app.state.drafts.submit(tutor.profile_id, course.id).await.unwrap();
    app.state.drafts.approve(admin_id, course.id, None).await.unwrap();
    course.id
}

pub fn lesson_date() -> NaiveDate {
    (Utc::now() + Duration::days(7)).date_naive()
}

pub async fn seed_balance(pool: &PgPool, tutor_id: Uuid, amount: Decimal) {
    sqlx::query(
        "INSERT INTO mentor_balances (tutor_id, balance) VALUES ($1, $2)
         ON CONFLICT (tutor_id) DO UPDATE SET balance = EXCLUDED.balance",
    )
    .bind(tutor_id)
    .bind(amount)
    .execute(pool)
    .await
    .unwrap();
}
