pub mod accounts;
pub mod bookings;
pub mod config;
pub mod courses;
pub mod earnings;
pub mod email;
pub mod encryption;
pub mod gateways;
pub mod handlers;
pub mod mentor_students;
pub mod notifications;
pub mod notifier;
pub mod profiles;
pub mod routes;
pub mod scheduler;
pub mod subscriptions;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use lesprivate_auth::JwtService;
use lesprivate_common::{AppError, RedisService};
use lesprivate_database::Database;

use crate::accounts::AccountService;
use crate::bookings::BookingCoordinator;
use crate::config::ApiConfig;
use crate::courses::{CourseDraftEngine, CourseQueryEngine};
use crate::earnings::EarningsLedger;
use crate::email::EmailService;
use crate::encryption::EncryptionService;
use crate::gateways::PaymentGateway;
use crate::mentor_students::MentorStudentLink;
use crate::notifications::NotificationQueue;
use crate::notifier::Notifier;
use crate::profiles::Profiles;
use crate::scheduler::SweepRunner;
use crate::subscriptions::SubscriptionReconciler;
use crate::templates::TemplateEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub db: Database,
    /// View counters only; the API keeps serving when this is absent.
    pub redis: Option<RedisService>,
    pub jwt: JwtService,
    pub accounts: AccountService,
    pub profiles: Profiles,
    pub drafts: CourseDraftEngine,
    pub catalog: CourseQueryEngine,
    pub bookings: BookingCoordinator,
    pub subscriptions: SubscriptionReconciler,
    pub earnings: EarningsLedger,
    pub mentors: MentorStudentLink,
    pub notifications: NotificationQueue,
    pub sweeps: SweepRunner,
}

impl AppState {
    pub fn build(
        config: ApiConfig,
        db: Database,
        redis: Option<RedisService>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, AppError> {
        let jwt = JwtService::new(&config.jwt);
        let notifications = NotificationQueue::new(db.clone(), config.notifications.retention_days);
        let delivery_timeout = Duration::from_secs(config.notifications.delivery_timeout_secs);
        let notifier = Notifier::new(
            db.clone(),
            notifications.clone(),
            EmailService::new(&config.email)?,
            TemplateEngine::new()?,
            delivery_timeout,
            config.app_base_url.clone(),
        );
        let encryption = EncryptionService::new(&config.encryption.key)?;

        let bookings = BookingCoordinator::new(
            db.clone(),
            notifier.clone(),
            config.booking.clone(),
            config.sweeps.clone(),
        );
        let sweeps = SweepRunner::new(
            bookings.clone(),
            notifications.clone(),
            Duration::from_secs(config.sweeps.batch_timeout_secs),
        );

        Ok(Self {
            accounts: AccountService::new(db.clone(), jwt.clone()),
            profiles: Profiles::new(db.clone()),
            drafts: CourseDraftEngine::new(
                db.clone(),
                notifier.clone(),
                config.booking.default_expiration_hours,
            ),
            catalog: CourseQueryEngine::new(db.clone()),
            subscriptions: SubscriptionReconciler::new(
                db.clone(),
                gateway,
                notifier.clone(),
                config.gateway.clone(),
            ),
            earnings: EarningsLedger::new(db.clone(), notifier, encryption),
            mentors: MentorStudentLink::new(db.clone()),
            bookings,
            notifications,
            sweeps,
            jwt,
            redis,
            db,
            config: Arc::new(config),
        })
    }
}
