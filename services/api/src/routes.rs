use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use lesprivate_auth::{auth_middleware, require_admin, require_student, require_tutor, JwtService};

use crate::handlers::{
    auth, bookings, courses, earnings, health, internal, mentors, notifications, reviews,
    subscriptions,
};
use crate::AppState;

pub fn create_routes(jwt: JwtService) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/courses", get(courses::search))
        .route("/courses/:id", get(courses::detail))
        .route("/subscription-prices", get(subscriptions::prices))
        .route("/webhook/xendit", post(subscriptions::xendit_webhook));

    // Guarded by X-Internal-Key inside the handlers.
    let internal = Router::new()
        .route("/internal/booking/expired", post(internal::expire_bookings))
        .route("/internal/booking/reminder-expired", post(internal::remind_expiring))
        .route("/internal/booking/reminder-course", post(internal::remind_course))
        .route("/internal/booking/review", post(internal::request_reviews))
        .route("/internal/notifications/retention", delete(internal::notification_retention));

    let signed_in = Router::new()
        .route("/notifications", get(notifications::list))
        .route("/notifications/:id", delete(notifications::delete))
        .route("/notifications/:id/read", put(notifications::mark_read))
        .route("/notifications/:id/dismiss", put(notifications::dismiss))
        .route_layer(middleware::from_fn_with_state(jwt.clone(), auth_middleware));

    let student = Router::new()
        .route(
            "/students/booking",
            post(bookings::create_booking).get(bookings::student_bookings),
        )
        .route("/students/reviews/:booking_id", put(reviews::student_review))
        .route(
            "/students/subscriptions",
            post(subscriptions::checkout).get(subscriptions::my_subscriptions),
        )
        .route("/students/subscriptions/:id/cancel", post(subscriptions::cancel))
        .route("/students/mentors/join", post(mentors::join))
        .route_layer(middleware::from_fn(require_student))
        .route_layer(middleware::from_fn_with_state(jwt.clone(), auth_middleware));

    let tutor = Router::new()
        .route("/tutors/courses", post(courses::create_course).get(courses::my_courses))
        .route(
            "/tutors/courses/:id",
            put(courses::update_course)
                .get(courses::my_course)
                .delete(courses::delete_course),
        )
        .route("/tutors/courses/:id/submit", post(courses::submit_course))
        .route("/tutors/booking", get(bookings::tutor_bookings))
        .route("/tutors/booking/:id/approve", put(bookings::approve_booking))
        .route("/tutors/booking/:id/decline", put(bookings::decline_booking))
        .route("/tutors/reviews/:booking_id", put(reviews::tutor_review))
        .route("/mentor/balance", get(earnings::balance))
        .route("/mentor/balance/transactions", get(earnings::transactions))
        .route(
            "/mentor/withdrawals",
            post(earnings::request_withdrawal).get(earnings::my_withdrawals),
        )
        .route("/mentor/invite-code", get(mentors::invite_code))
        .route("/mentor/students", get(mentors::students))
        .route_layer(middleware::from_fn(require_tutor))
        .route_layer(middleware::from_fn_with_state(jwt.clone(), auth_middleware));

    let admin = Router::new()
        .route("/admin/course-drafts", get(courses::pending_drafts))
        .route("/admin/courses/:id/drafts", get(courses::draft_history))
        .route("/admin/courses/:id/approve", post(courses::approve_course))
        .route("/admin/courses/:id/reject", post(courses::reject_course))
        .route(
            "/admin/reviews/:kind/:id",
            put(reviews::admin_update_review).delete(reviews::admin_delete_review),
        )
        .route("/admin/withdrawals", get(earnings::all_withdrawals))
        .route("/admin/withdrawals/:id/approve", post(earnings::approve_withdrawal))
        .route("/admin/withdrawals/:id/reject", post(earnings::reject_withdrawal))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(jwt, auth_middleware));

    let v1 = public
        .merge(internal)
        .merge(signed_in)
        .merge(student)
        .merge(tutor)
        .merge(admin);

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/v1", v1)
}
