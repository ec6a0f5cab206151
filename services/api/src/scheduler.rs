use std::time::Duration;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use lesprivate_common::AppError;

use crate::bookings::sweeps::Sweep;
use crate::bookings::BookingCoordinator;
use crate::notifications::NotificationQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTask {
    Booking(Sweep),
    NotificationRetention,
}

impl SweepTask {
    pub const ALL: [SweepTask; 5] = [
        SweepTask::Booking(Sweep::Expire),
        SweepTask::Booking(Sweep::ExpiryReminder),
        SweepTask::Booking(Sweep::CourseReminder),
        SweepTask::Booking(Sweep::ReviewRequest),
        SweepTask::NotificationRetention,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SweepTask::Booking(sweep) => sweep.name(),
            SweepTask::NotificationRetention => "notification_retention",
        }
    }
}

/// Runs sweeps detached from whoever asked for them; failures only reach the log.
#[derive(Clone)]
pub struct SweepRunner {
    bookings: BookingCoordinator,
    notifications: NotificationQueue,
    retention_timeout: Duration,
}

impl SweepRunner {
    pub fn new(bookings: BookingCoordinator, notifications: NotificationQueue, retention_timeout: Duration) -> Self {
        Self {
            bookings,
            notifications,
            retention_timeout,
        }
    }

    pub async fn run(&self, task: SweepTask) -> Result<u64, AppError> {
        match task {
            SweepTask::Booking(sweep) => {
                let report = self.bookings.run_sweep(sweep, Utc::now()).await?;
                Ok(report.processed as u64)
            }
            SweepTask::NotificationRetention => {
                tokio::time::timeout(self.retention_timeout, self.notifications.retain(Utc::now()))
                    .await
                    .map_err(|_| AppError::Internal("Notification retention timed out".to_string()))?
            }
        }
    }

    pub fn spawn(&self, task: SweepTask) {
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run(task).await {
                tracing::error!(sweep = task.name(), error = %e, "Sweep failed");
            }
        });
    }
}

/// In-process timer driving every sweep on one cron expression.
pub struct SweepScheduler {
    scheduler: JobScheduler,
}

impl SweepScheduler {
    pub async fn new(runner: SweepRunner, cron_expression: &str) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("Scheduler creation error: {}", e)))?;

        for task in SweepTask::ALL {
            let runner = runner.clone();
            let job = Job::new_async(cron_expression, move |_id, _scheduler| {
                let runner = runner.clone();
                Box::pin(async move {
                    match runner.run(task).await {
                        Ok(processed) => {
                            tracing::debug!(sweep = task.name(), processed, "Scheduled sweep ran")
                        }
                        Err(e) => tracing::error!(sweep = task.name(), error = %e, "Scheduled sweep failed"),
                    }
                })
            })
            .map_err(|e| AppError::Internal(format!("Invalid sweep schedule '{}': {}", cron_expression, e)))?;

            scheduler
                .add(job)
                .await
                .map_err(|e| AppError::Internal(format!("Scheduler job error: {}", e)))?;
        }

        Ok(Self { scheduler })
    }

    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("Scheduler start error: {}", e)))?;

        tracing::info!("Sweep scheduler started");
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler shutdown failed");
        }
    }
}
