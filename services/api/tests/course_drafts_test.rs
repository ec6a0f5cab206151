mod common;

use lesprivate_common::{codes, AppError, CourseStatus, DraftStatus};

use common::{category, payload, published_course, setup, tutor};

#[tokio::test]
async fn test_editing_a_published_course_forks_a_draft() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    let course_id = published_course(&app, &tutor, "Matematika SMA").await;

    let published = app.state.catalog.detail(course_id, None).await.unwrap();
    assert_eq!(published.content.title, "Matematika SMA");

    let category_id = published.content.course_category_id;
    let edited = app
        .state
        .drafts
        .update(tutor.profile_id, course_id, payload(category_id, "Matematika SMA Intensif"))
        .await
        .unwrap();
    assert_eq!(edited.status, CourseStatus::Draft);
    assert_eq!(edited.content.title, "Matematika SMA Intensif");
    assert_eq!(edited.draft.as_ref().map(|d| d.status), Some(DraftStatus::Draft));

    // The catalogue keeps serving the approved snapshot until the fork is approved.
    let still_published = app.state.catalog.detail(course_id, None).await.unwrap();
    assert_eq!(still_published.content.title, "Matematika SMA");

    let history = app.state.drafts.draft_history(course_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history.iter().filter(|d| d.status == DraftStatus::Approved).count(),
        1
    );
}

#[tokio::test]
async fn test_pending_draft_cannot_be_edited_and_rejection_needs_a_note() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    let category_id = category(&app.pool).await;
    let admin_id = common::admin(&app.pool).await;

    let course = app
        .state
        .drafts
        .create(tutor.profile_id, payload(category_id, "Fisika Dasar"))
        .await
        .unwrap();
    app.state.drafts.submit(tutor.profile_id, course.id).await.unwrap();

    let edit = app
        .state
        .drafts
        .update(tutor.profile_id, course.id, payload(category_id, "Fisika Lanjut"))
        .await;
    assert!(matches!(edit, Err(AppError::Conflict { code, .. }) if code == codes::INVALID_STATE_TRANSITION));

    let no_note = app.state.drafts.reject(admin_id, course.id, "  ".to_string()).await;
    assert!(matches!(no_note, Err(AppError::Validation(_))));

    let rejected = app
        .state
        .drafts
        .reject(admin_id, course.id, "Add a syllabus".to_string())
        .await
        .unwrap();
    assert_eq!(rejected.status, CourseStatus::Rejected);
    assert_eq!(
        rejected.draft.as_ref().and_then(|d| d.review_note.clone()).as_deref(),
        Some("Add a syllabus")
    );

    // Never published, so the public catalogue does not know it.
    let detail = app.state.catalog.detail(course.id, None).await;
    assert!(matches!(detail, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_deleted_course_cannot_be_approved_or_rejected() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    let category_id = category(&app.pool).await;
    let admin_id = common::admin(&app.pool).await;

    let course = app
        .state
        .drafts
        .create(tutor.profile_id, payload(category_id, "Kimia Organik"))
        .await
        .unwrap();
    app.state.drafts.submit(tutor.profile_id, course.id).await.unwrap();
    app.state.drafts.delete(tutor.profile_id, course.id).await.unwrap();

    let approve = app.state.drafts.approve(admin_id, course.id, None).await;
    assert!(matches!(approve, Err(AppError::Conflict { code, .. }) if code == codes::COURSE_DELETED));

    let reject = app
        .state
        .drafts
        .reject(admin_id, course.id, "Duplicate listing".to_string())
        .await;
    assert!(matches!(reject, Err(AppError::Conflict { code, .. }) if code == codes::COURSE_DELETED));
}
