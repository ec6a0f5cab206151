//! Sweeps claim every due row in the table, so this binary holds a single
//! test: a parallel test could otherwise add due rows between two runs.

mod common;

use chrono::{Duration, NaiveTime};
use uuid::Uuid;

use lesprivate_api::bookings::sweeps::Sweep;
use lesprivate_api::bookings::{CreateBooking, RespondBooking};
use lesprivate_common::{BookingStatus, ClassType};
use lesprivate_database::Booking;

use common::{lesson_date, published_course, setup, student, tutor, TestApp};

fn request(course_id: Uuid) -> CreateBooking {
    CreateBooking {
        course_id,
        date: lesson_date(),
        time: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        timezone: "Asia/Makassar".to_string(),
        class_type: ClassType::Online,
        note: None,
    }
}

async fn reload(app: &TestApp, id: Uuid) -> Booking {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
        .bind(id)
        .fetch_one(&app.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_each_sweep_claims_a_booking_once() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    let waiting_student = student(&app.pool).await;
    let confirmed_student = student(&app.pool).await;
    let course_id = published_course(&app, &tutor, "Ekonomi").await;
    let bookings = &app.state.bookings;

    let waiting = bookings
        .create(waiting_student.profile_id, request(course_id))
        .await
        .unwrap()
        .booking;
    let confirmed = bookings
        .create(confirmed_student.profile_id, request(course_id))
        .await
        .unwrap()
        .booking;
    bookings
        .accept(tutor.profile_id, confirmed.id, RespondBooking::default())
        .await
        .unwrap();

    // Reminder before the tutor's answer window closes.
    let reminder_at = waiting.expired_at - Duration::hours(1);
    let first = bookings.run_sweep(Sweep::ExpiryReminder, reminder_at).await.unwrap();
    assert!(first.processed >= 1);
    assert!(reload(&app, waiting.id).await.expiry_reminded_at.is_some());
    let second = bookings.run_sweep(Sweep::ExpiryReminder, reminder_at).await.unwrap();
    assert_eq!(second.processed, 0);

    // Expiry is inclusive of the deadline itself.
    let just_before = waiting.expired_at - Duration::microseconds(1);
    bookings.run_sweep(Sweep::Expire, just_before).await.unwrap();
    assert_eq!(reload(&app, waiting.id).await.status, BookingStatus::Pending);

    let first = bookings.run_sweep(Sweep::Expire, waiting.expired_at).await.unwrap();
    assert!(first.processed >= 1);
    assert_eq!(reload(&app, waiting.id).await.status, BookingStatus::Expired);
    assert_eq!(reload(&app, confirmed.id).await.status, BookingStatus::Accepted);
    let second = bookings.run_sweep(Sweep::Expire, waiting.expired_at).await.unwrap();
    assert_eq!(second.processed, 0);

    // Course reminder inside the window before the lesson starts.
    let lesson_soon = confirmed.starts_at - Duration::minutes(30);
    let first = bookings.run_sweep(Sweep::CourseReminder, lesson_soon).await.unwrap();
    assert!(first.processed >= 1);
    assert!(reload(&app, confirmed.id).await.course_reminded_at.is_some());
    let second = bookings.run_sweep(Sweep::CourseReminder, lesson_soon).await.unwrap();
    assert_eq!(second.processed, 0);

    // Review requests go out once the post-lesson delay has passed.
    let too_early = confirmed.starts_at + Duration::minutes(30);
    bookings.run_sweep(Sweep::ReviewRequest, too_early).await.unwrap();
    assert!(!reload(&app, confirmed.id).await.is_reviewed);

    let after_lesson = confirmed.starts_at + Duration::hours(2);
    let first = bookings.run_sweep(Sweep::ReviewRequest, after_lesson).await.unwrap();
    assert!(first.processed >= 1);
    assert!(reload(&app, confirmed.id).await.is_reviewed);
    let second = bookings.run_sweep(Sweep::ReviewRequest, after_lesson).await.unwrap();
    assert_eq!(second.processed, 0);
}
