use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use lesprivate_common::{AppError, NotificationKind};

use super::{load_parties, BookingCoordinator, BookingParties};
use crate::notifier::Notice;
use crate::templates::EmailTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    Expire,
    ExpiryReminder,
    CourseReminder,
    ReviewRequest,
}

impl Sweep {
    pub fn name(&self) -> &'static str {
        match self {
            Sweep::Expire => "expire",
            Sweep::ExpiryReminder => "expiry_reminder",
            Sweep::CourseReminder => "course_reminder",
            Sweep::ReviewRequest => "review_request",
        }
    }

    /// Claims up to `$2` due rows and flips the flag the selection reads, so a
    /// row is picked by at most one run. `$1` is the sweep's cutoff instant.
    fn claim_sql(&self) -> &'static str {
        match self {
            Sweep::Expire => {
                r#"
                WITH due AS (
                    SELECT id FROM bookings
                    WHERE status = 'pending' AND expired_at <= $1
                    ORDER BY expired_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE bookings b SET status = 'expired', updated_at = $3
                FROM due WHERE b.id = due.id
                RETURNING b.id
                "#
            }
            Sweep::ExpiryReminder => {
                r#"
                WITH due AS (
                    SELECT id FROM bookings
                    WHERE status = 'pending' AND expiry_reminded_at IS NULL
                      AND expired_at <= $1 AND expired_at > $3
                    ORDER BY expired_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE bookings b SET expiry_reminded_at = $3, updated_at = $3
                FROM due WHERE b.id = due.id
                RETURNING b.id
                "#
            }
            Sweep::CourseReminder => {
                r#"
                WITH due AS (
                    SELECT id FROM bookings
                    WHERE status = 'accepted' AND course_reminded_at IS NULL
                      AND starts_at <= $1 AND starts_at > $3
                    ORDER BY starts_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE bookings b SET course_reminded_at = $3, updated_at = $3
                FROM due WHERE b.id = due.id
                RETURNING b.id
                "#
            }
            Sweep::ReviewRequest => {
                r#"
                WITH due AS (
                    SELECT id FROM bookings
                    WHERE status = 'accepted' AND is_reviewed = FALSE AND starts_at <= $1
                    ORDER BY starts_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE bookings b SET is_reviewed = TRUE, updated_at = $3
                FROM due WHERE b.id = due.id
                RETURNING b.id
                "#
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sweep: Sweep,
    pub processed: usize,
    pub batches: usize,
    /// Set when a batch ran out of time; remaining rows wait for the next run.
    pub timed_out: bool,
}

impl BookingCoordinator {
    fn cutoff(&self, sweep: Sweep, now: DateTime<Utc>) -> DateTime<Utc> {
        match sweep {
            Sweep::Expire => now,
            Sweep::ExpiryReminder => now + Duration::minutes(self.config.expiry_reminder_minutes),
            Sweep::CourseReminder => now + Duration::minutes(self.config.course_reminder_minutes),
            Sweep::ReviewRequest => now - Duration::minutes(self.config.review_delay_minutes),
        }
    }

    /// Runs `sweep` as of `now` in batches until a batch comes back short.
    pub async fn run_sweep(&self, sweep: Sweep, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let batch_size = self.sweeps.batch_size.max(1);
        let time_box = StdDuration::from_secs(self.sweeps.batch_timeout_secs.max(1));
        let cutoff = self.cutoff(sweep, now);

        let mut report = SweepReport {
            sweep,
            processed: 0,
            batches: 0,
            timed_out: false,
        };

        loop {
            let batch = self.db.write(move |tx| {
                Box::pin(async move {
                    let ids = sqlx::query_scalar::<_, Uuid>(sweep.claim_sql())
                        .bind(cutoff)
                        .bind(batch_size)
                        .bind(now)
                        .fetch_all(&mut **tx)
                        .await?;
                    load_parties(&mut **tx, &ids).await
                })
            });

            let claimed = match tokio::time::timeout(time_box, batch).await {
                Ok(claimed) => claimed?,
                Err(_) => {
                    tracing::warn!(sweep = sweep.name(), "Sweep batch timed out");
                    report.timed_out = true;
                    break;
                }
            };

            report.batches += 1;
            report.processed += claimed.len();
            let short = (claimed.len() as i64) < batch_size;
            self.notify_swept(sweep, &claimed);

            if short {
                break;
            }
        }

        if report.processed > 0 {
            tracing::info!(
                sweep = sweep.name(),
                processed = report.processed,
                batches = report.batches,
                "Booking sweep finished"
            );
        }
        Ok(report)
    }

    fn notify_swept(&self, sweep: Sweep, claimed: &[BookingParties]) {
        let notices = claimed
            .iter()
            .flat_map(|parties| self.sweep_notices(sweep, parties))
            .collect();
        self.notifier.dispatch(notices);
    }

    fn sweep_notices(&self, sweep: Sweep, parties: &BookingParties) -> Vec<Notice> {
        let b = &parties.booking;
        let data = parties.email_data();
        let student_link = self.notifier.url(&format!("student/bookings/{}", b.id));
        let tutor_link = self.notifier.url(&format!("tutor/bookings/{}", b.id));

        match sweep {
            Sweep::Expire => vec![Notice::new(
                parties.student_user_id,
                NotificationKind::Booking,
                "Booking expired",
                format!("Booking {} expired before {} responded", b.code, parties.tutor_name),
            )
            .once(parties.once("expired"))
            .link(student_link)
            .email(EmailTemplate::BookingExpired, data)],
            Sweep::ExpiryReminder => vec![Notice::new(
                parties.tutor_user_id,
                NotificationKind::Booking,
                "Booking about to expire",
                format!("Respond to {}'s booking {} soon", parties.student_name, b.code),
            )
            .once(parties.once("expiry_reminder"))
            .link(tutor_link)
            .email(EmailTemplate::BookingExpiryReminder, data)],
            Sweep::CourseReminder => vec![Notice::new(
                parties.student_user_id,
                NotificationKind::Booking,
                "Upcoming lesson",
                format!("\"{}\" with {} starts soon", parties.course_title, parties.tutor_name),
            )
            .once(parties.once("course_reminder"))
            .link(student_link)
            .email(EmailTemplate::CourseReminder, data)],
            Sweep::ReviewRequest => vec![
                Notice::new(
                    parties.student_user_id,
                    NotificationKind::Review,
                    "How was your lesson?",
                    format!("Rate your lesson \"{}\" with {}", parties.course_title, parties.tutor_name),
                )
                .once(parties.once("review_request"))
                .link(self.notifier.url(&format!("student/reviews/{}", b.id)))
                .email(EmailTemplate::ReviewRequest, data.clone()),
                Notice::new(
                    parties.tutor_user_id,
                    NotificationKind::Review,
                    "How was your lesson?",
                    format!("Review {} after \"{}\"", parties.student_name, parties.course_title),
                )
                .once(parties.once("review_request"))
                .link(self.notifier.url(&format!("tutor/reviews/{}", b.id)))
                .email(EmailTemplate::ReviewRequest, data),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_claim_flips_the_flag_it_selects_on() {
        let pairs = [
            (Sweep::Expire, "status = 'pending'", "status = 'expired'"),
            (Sweep::ExpiryReminder, "expiry_reminded_at IS NULL", "expiry_reminded_at = $3"),
            (Sweep::CourseReminder, "course_reminded_at IS NULL", "course_reminded_at = $3"),
            (Sweep::ReviewRequest, "is_reviewed = FALSE", "is_reviewed = TRUE"),
        ];
        for (sweep, selects, sets) in pairs {
            let sql = sweep.claim_sql();
            assert!(sql.contains(selects), "{} selection", sweep.name());
            assert!(sql.contains(sets), "{} update", sweep.name());
            assert!(sql.contains("SKIP LOCKED"));
        }
    }
}
