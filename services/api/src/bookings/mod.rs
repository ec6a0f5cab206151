//! Booking state machine: pending → accepted | declined | expired.
//!
//! Only `pending` bookings move. Acceptance creates the review pair and, unless
//! the lesson is a free first course, credits the tutor's ledger in the same
//! transaction. Time-based transitions and reminders live in [`sweeps`].

pub mod reviews;
pub mod schedule;
pub mod sweeps;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;
use validator::Validate;

use lesprivate_common::{
    codes, AppError, BookingStatus, ClassType, NotificationKind, Pagination,
    TransactionType,
};
use lesprivate_database::{Booking, CoursePrice, CourseSchedule, Database};

use crate::config::{BookingConfig, SweepConfig};
use crate::courses::find_course;
use crate::courses::payload::{fits_schedule, hourly_price, ScheduleSlot};
use crate::earnings::{post_entry, references, LedgerEntry};
use crate::notifier::{Notice, Notifier};
use crate::templates::EmailTemplate;

pub use reviews::{ReviewInput, ReviewKind};
pub use sweeps::SweepReport;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBooking {
    pub course_id: Uuid,
    #[serde(alias = "bookingDate")]
    pub date: NaiveDate,
    #[serde(alias = "bookingTime")]
    pub time: NaiveTime,
    #[validate(length(min = 1, max = 64, message = "is required"))]
    pub timezone: String,
    pub class_type: ClassType,
    #[serde(alias = "notes")]
    #[validate(length(max = 1000, message = "is too long"))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RespondBooking {
    #[serde(alias = "note")]
    #[validate(length(max = 1000, message = "is too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
}

/// A booking joined with the names and accounts needed to talk about it.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BookingParties {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub booking: Booking,
    pub course_title: String,
    #[serde(skip)]
    pub student_user_id: Uuid,
    pub student_name: String,
    #[serde(skip)]
    pub tutor_user_id: Uuid,
    pub tutor_name: String,
}

impl BookingParties {
    /// Template variables shared by every booking email.
    fn email_data(&self) -> Value {
        let b = &self.booking;
        json!({
            "code": b.code,
            "course": self.course_title,
            "date": b.booking_date.to_string(),
            "time": b.booking_time.format("%H:%M").to_string(),
            "timezone": b.timezone,
            "student": self.student_name,
            "tutor": self.tutor_name,
            "expires_at": b.expired_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            "notes": b.tutor_notes,
        })
    }

    fn once(&self, event: &str) -> String {
        format!("booking:{}:{}", self.booking.id, event)
    }
}

#[derive(Debug, Clone, FromRow)]
struct PartiesPage {
    #[sqlx(flatten)]
    parties: BookingParties,
    total_count: i64,
}

const PARTIES_SELECT: &str = r#"
    SELECT b.*, c.title AS course_title,
           su.id AS student_user_id, su.name AS student_name,
           tu.id AS tutor_user_id, tu.name AS tutor_name
    FROM bookings b
    JOIN courses c ON c.id = b.course_id
    JOIN students s ON s.id = b.student_id
    JOIN users su ON su.id = s.user_id
    JOIN tutors t ON t.id = b.tutor_id
    JOIN users tu ON tu.id = t.user_id
"#;

pub(crate) async fn load_parties(
    conn: &mut PgConnection,
    booking_ids: &[Uuid],
) -> Result<Vec<BookingParties>, AppError> {
    if booking_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, BookingParties>(&format!(
        "{} WHERE b.id = ANY($1) ORDER BY b.created_at",
        PARTIES_SELECT
    ))
    .bind(booking_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// A lost race on the partial unique index reports as the same conflict as the explicit check.
fn duplicate_pending(err: AppError) -> AppError {
    if let AppError::Database(sqlx::Error::Database(db)) = &err {
        if db.constraint() == Some("bookings_pending_per_student_course") {
            return duplicate_pending_conflict();
        }
    }
    err
}

fn duplicate_pending_conflict() -> AppError {
    AppError::conflict(
        codes::DUPLICATE_PENDING_BOOKING,
        "You already have a pending booking for this course",
    )
}

#[derive(Clone)]
pub struct BookingCoordinator {
    db: Database,
    notifier: Notifier,
    config: BookingConfig,
    sweeps: SweepConfig,
}

impl BookingCoordinator {
    pub fn new(db: Database, notifier: Notifier, config: BookingConfig, sweeps: SweepConfig) -> Self {
        Self {
            db,
            notifier,
            config,
            sweeps,
        }
    }

    pub async fn create(&self, student_id: Uuid, input: CreateBooking) -> Result<BookingParties, AppError> {
        self.create_at(student_id, input, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        student_id: Uuid,
        input: CreateBooking,
        now: DateTime<Utc>,
    ) -> Result<BookingParties, AppError> {
        input.validate()?;
        if !matches!(input.class_type, ClassType::Online | ClassType::Offline) {
            return Err(AppError::Validation(
                "classType: choose either online or offline".to_string(),
            ));
        }
        let offset = schedule::parse_timezone(&input.timezone)?;
        let starts_at = schedule::lesson_start(input.date, input.time, offset)?;
        if starts_at <= now {
            return Err(AppError::Validation(
                "date: the lesson must start in the future".to_string(),
            ));
        }
        let weekday = schedule::weekday_index(input.date);
        let default_hours = self.config.default_expiration_hours;

        let parties = self
            .db
            .write(move |tx| {
                let input = input.clone();
                let code = schedule::booking_code();
                Box::pin(async move {
                    let course = find_course(&mut **tx, input.course_id, false).await?;
                    let tutor_active = sqlx::query_scalar::<_, bool>(
                        r#"
                        SELECT t.is_active AND u.deleted_at IS NULL
                        FROM tutors t JOIN users u ON u.id = t.user_id
                        WHERE t.id = $1
                        "#,
                    )
                    .bind(course.tutor_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    // A course being re-edited keeps serving its published snapshot.
                    if course.deleted_at.is_some() || course.published_at.is_none() || !tutor_active {
                        return Err(AppError::conflict(
                            codes::COURSE_NOT_BOOKABLE,
                            "Course is not open for booking",
                        ));
                    }
                    if !course.class_type.supports(input.class_type) {
                        return Err(AppError::Validation(format!(
                            "classType: this course is not offered {}",
                            input.class_type.as_str()
                        )));
                    }

                    let slots: Vec<ScheduleSlot> = sqlx::query_as::<_, CourseSchedule>(
                        "SELECT * FROM course_schedules WHERE course_id = $1",
                    )
                    .bind(course.id)
                    .fetch_all(&mut **tx)
                    .await?
                    .into_iter()
                    .map(|s| ScheduleSlot {
                        weekday: s.weekday,
                        start_time: s.start_time,
                        end_time: s.end_time,
                    })
                    .collect();
                    if !fits_schedule(&slots, weekday, input.time) {
                        return Err(AppError::Validation(
                            "time: the lesson must fit inside one of the course's schedule slots"
                                .to_string(),
                        ));
                    }

                    let already_pending = sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS(SELECT 1 FROM bookings WHERE student_id = $1 AND course_id = $2 AND status = 'pending')",
                    )
                    .bind(student_id)
                    .bind(course.id)
                    .fetch_one(&mut **tx)
                    .await?;
                    if already_pending {
                        return Err(duplicate_pending_conflict());
                    }

                    let booked_before = sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS(SELECT 1 FROM bookings WHERE student_id = $1 AND tutor_id = $2)",
                    )
                    .bind(student_id)
                    .bind(course.tutor_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    let free_first = course.is_free_first_course && !booked_before;

                    let prices = sqlx::query_as::<_, CoursePrice>(
                        "SELECT * FROM course_prices WHERE course_id = $1",
                    )
                    .bind(course.id)
                    .fetch_all(&mut **tx)
                    .await?;
                    let price = hourly_price(prices.iter().map(|p| (p.duration_minutes, p.price)))
                        .ok_or_else(|| {
                            AppError::conflict(codes::COURSE_NOT_BOOKABLE, "Course has no price")
                        })?;

                    let hours = if course.expiration_hours > 0 {
                        course.expiration_hours
                    } else {
                        default_hours
                    };
                    let booking_id = Uuid::new_v4();

                    sqlx::query(
                        r#"
                        INSERT INTO bookings
                            (id, code, student_id, tutor_id, course_id, booking_date, booking_time,
                             timezone, starts_at, class_type, student_notes, price, status, expired_at,
                             is_free_first_course, created_at, updated_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending', $13, $14, $15, $15)
                        "#,
                    )
                    .bind(booking_id)
                    .bind(&code)
                    .bind(student_id)
                    .bind(course.tutor_id)
                    .bind(course.id)
                    .bind(input.date)
                    .bind(input.time)
                    .bind(input.timezone.trim())
                    .bind(starts_at)
                    .bind(input.class_type)
                    .bind(input.note.as_deref().map(str::trim).filter(|n| !n.is_empty()))
                    .bind(price)
                    .bind(now + Duration::hours(i64::from(hours)))
                    .bind(free_first)
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;

                    load_parties(&mut **tx, &[booking_id])
                        .await?
                        .pop()
                        .ok_or_else(|| AppError::Internal("Booking vanished after insert".to_string()))
                })
            })
            .await
            .map_err(duplicate_pending)?;

        let b = &parties.booking;
        tracing::info!(
            booking_id = %b.id,
            code = %b.code,
            %student_id,
            tutor_id = %b.tutor_id,
            free_first = b.is_free_first_course,
            "Booking requested"
        );

        let data = parties.email_data();
        self.notifier.dispatch(vec![
            Notice::new(
                parties.student_user_id,
                NotificationKind::Booking,
                "Booking request sent",
                format!("Your request {} for \"{}\" was sent", b.code, parties.course_title),
            )
            .link(self.notifier.url(&format!("student/bookings/{}", b.id)))
            .email(EmailTemplate::BookingRequested, data.clone()),
            Notice::new(
                parties.tutor_user_id,
                NotificationKind::Booking,
                "New booking request",
                format!("{} wants to book \"{}\"", parties.student_name, parties.course_title),
            )
            .link(self.notifier.url(&format!("tutor/bookings/{}", b.id)))
            .email(EmailTemplate::BookingReceived, data),
        ]);

        Ok(parties)
    }

    pub async fn accept(
        &self,
        tutor_id: Uuid,
        booking_id: Uuid,
        input: RespondBooking,
    ) -> Result<BookingParties, AppError> {
        self.accept_at(tutor_id, booking_id, input, Utc::now()).await
    }

    /// Locks the booking, then the tutor's balance row when a credit is due.
    pub async fn accept_at(
        &self,
        tutor_id: Uuid,
        booking_id: Uuid,
        input: RespondBooking,
        now: DateTime<Utc>,
    ) -> Result<BookingParties, AppError> {
        input.validate()?;

        let parties = self
            .db
            .write(move |tx| {
                let notes = input.notes.clone();
                Box::pin(async move {
                    let booking = lock_pending(&mut **tx, tutor_id, booking_id, now).await?;

                    sqlx::query(
                        r#"
                        UPDATE bookings
                        SET status = 'accepted', tutor_notes = COALESCE($2, tutor_notes),
                            responded_at = $3, updated_at = $3
                        WHERE id = $1
                        "#,
                    )
                    .bind(booking.id)
                    .bind(notes)
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;

                    for table in ["student_reviews", "tutor_reviews"] {
                        sqlx::query(&format!(
                            "INSERT INTO {} (id, booking_id, student_id, tutor_id) VALUES ($1, $2, $3, $4)",
                            table
                        ))
                        .bind(Uuid::new_v4())
                        .bind(booking.id)
                        .bind(booking.student_id)
                        .bind(booking.tutor_id)
                        .execute(&mut **tx)
                        .await?;
                    }

                    if !booking.is_free_first_course && booking.price > Decimal::ZERO {
                        post_entry(
                            &mut **tx,
                            &LedgerEntry {
                                tutor_id: booking.tutor_id,
                                transaction_type: TransactionType::Credit,
                                amount: booking.price,
                                description: format!("Booking {}", booking.code),
                                reference_type: references::BOOKING,
                                reference_id: booking.id,
                            },
                        )
                        .await?;
                    }

                    load_parties(&mut **tx, &[booking.id])
                        .await?
                        .pop()
                        .ok_or_else(|| AppError::not_found("Booking"))
                })
            })
            .await?;

        let b = &parties.booking;
        tracing::info!(booking_id = %b.id, %tutor_id, credited = !b.is_free_first_course, "Booking accepted");

        let data = parties.email_data();
        self.notifier.dispatch(vec![
            Notice::new(
                parties.student_user_id,
                NotificationKind::Booking,
                "Booking accepted",
                format!("{} accepted your booking {}", parties.tutor_name, b.code),
            )
            .link(self.notifier.url(&format!("student/bookings/{}", b.id)))
            .email(EmailTemplate::BookingAccepted, data.clone()),
            Notice::new(
                parties.tutor_user_id,
                NotificationKind::Booking,
                "Booking confirmed",
                format!("You accepted booking {} from {}", b.code, parties.student_name),
            )
            .link(self.notifier.url(&format!("tutor/bookings/{}", b.id)))
            .email(EmailTemplate::BookingConfirmed, data),
        ]);

        Ok(parties)
    }

    pub async fn decline(
        &self,
        tutor_id: Uuid,
        booking_id: Uuid,
        input: RespondBooking,
    ) -> Result<BookingParties, AppError> {
        input.validate()?;
        let now = Utc::now();

        let parties = self
            .db
            .write(move |tx| {
                let notes = input.notes.clone();
                Box::pin(async move {
                    let booking = lock_pending(&mut **tx, tutor_id, booking_id, now).await?;
                    sqlx::query(
                        r#"
                        UPDATE bookings
                        SET status = 'declined', tutor_notes = COALESCE($2, tutor_notes),
                            responded_at = $3, updated_at = $3
                        WHERE id = $1
                        "#,
                    )
                    .bind(booking.id)
                    .bind(notes)
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;

                    load_parties(&mut **tx, &[booking.id])
                        .await?
                        .pop()
                        .ok_or_else(|| AppError::not_found("Booking"))
                })
            })
            .await?;

        let b = &parties.booking;
        tracing::info!(booking_id = %b.id, %tutor_id, "Booking declined");
        self.notifier.dispatch(vec![Notice::new(
            parties.student_user_id,
            NotificationKind::Booking,
            "Booking declined",
            format!("{} declined your booking {}", parties.tutor_name, b.code),
        )
        .link(self.notifier.url(&format!("student/bookings/{}", b.id)))
        .email(EmailTemplate::BookingDeclined, parties.email_data())]);

        Ok(parties)
    }

    pub async fn list_for_student(
        &self,
        student_id: Uuid,
        filter: &BookingFilter,
        page: Pagination,
    ) -> Result<(Vec<BookingParties>, i64), AppError> {
        self.list("b.student_id", student_id, filter, page).await
    }

    pub async fn list_for_tutor(
        &self,
        tutor_id: Uuid,
        filter: &BookingFilter,
        page: Pagination,
    ) -> Result<(Vec<BookingParties>, i64), AppError> {
        self.list("b.tutor_id", tutor_id, filter, page).await
    }

    async fn list(
        &self,
        owner_column: &'static str,
        owner_id: Uuid,
        filter: &BookingFilter,
        page: Pagination,
    ) -> Result<(Vec<BookingParties>, i64), AppError> {
        let sql = format!(
            r#"
            SELECT listing.*, COUNT(*) OVER() AS total_count FROM ({}
                WHERE {} = $1 AND ($2::text IS NULL OR b.status = $2)
            ) listing
            ORDER BY listing.starts_at DESC, listing.id
            LIMIT $3 OFFSET $4
            "#,
            PARTIES_SELECT, owner_column
        );
        let rows = sqlx::query_as::<_, PartiesPage>(&sql)
            .bind(owner_id)
            .bind(filter.status)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.db.reader())
            .await?;

        let total = rows.first().map_or(0, |r| r.total_count);
        Ok((rows.into_iter().map(|r| r.parties).collect(), total))
    }
}

/// Locks a booking owned by `tutor_id` and checks it can still be answered.
async fn lock_pending(
    conn: &mut PgConnection,
    tutor_id: Uuid,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Booking, AppError> {
    let booking = sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE id = $1 AND tutor_id = $2 FOR UPDATE",
    )
    .bind(booking_id)
    .bind(tutor_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Booking"))?;

    match booking.status {
        BookingStatus::Pending if now >= booking.expired_at => Err(AppError::conflict(
            codes::BOOKING_EXPIRED,
            "Booking expired before it was answered",
        )),
        BookingStatus::Pending => Ok(booking),
        BookingStatus::Expired => Err(AppError::conflict(
            codes::BOOKING_EXPIRED,
            "Booking expired before it was answered",
        )),
        other => Err(AppError::conflict(
            codes::INVALID_STATE_TRANSITION,
            format!("Booking is already {}", other.as_str()),
        )),
    }
}
