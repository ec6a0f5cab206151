mod common;

use rust_decimal::Decimal;

use lesprivate_api::earnings::{WithdrawalFilter, WithdrawalInput};
use lesprivate_common::{codes, AppError, Pagination, TransactionType, WithdrawalStatus};

use common::{admin, seed_balance, setup, tutor};

fn withdrawal(amount: i64) -> WithdrawalInput {
    WithdrawalInput {
        amount: Decimal::new(amount, 0),
        bank_name: "BCA".to_string(),
        account_number: "1234567890".to_string(),
        account_name: "Tutor Test".to_string(),
    }
}

#[tokio::test]
async fn test_withdrawal_beyond_balance_is_refused() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    seed_balance(&app.pool, tutor.profile_id, Decimal::new(100_000, 0)).await;

    let result = app
        .state
        .earnings
        .request_withdrawal(tutor.profile_id, withdrawal(150_000))
        .await;
    assert!(matches!(result, Err(AppError::Conflict { code, .. }) if code == codes::INSUFFICIENT_BALANCE));

    let balance = app.state.earnings.balance(tutor.profile_id).await.unwrap();
    assert_eq!(balance.balance, Decimal::new(100_000, 0));
    let (history, total) = app
        .state
        .earnings
        .list_for_tutor(tutor.profile_id, &WithdrawalFilter::default(), Pagination::default())
        .await
        .unwrap();
    assert!(history.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_rejected_withdrawal_returns_the_hold() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    let admin_id = admin(&app.pool).await;
    seed_balance(&app.pool, tutor.profile_id, Decimal::new(500_000, 0)).await;

    let requested = app
        .state
        .earnings
        .request_withdrawal(tutor.profile_id, withdrawal(200_000))
        .await
        .unwrap();
    assert_eq!(requested.account_number, "****7890");
    assert_eq!(requested.request.status, WithdrawalStatus::Pending);

    let held = app.state.earnings.balance(tutor.profile_id).await.unwrap();
    assert_eq!(held.balance, Decimal::new(300_000, 0));

    let (all, _) = app
        .state
        .earnings
        .list_all(
            &WithdrawalFilter {
                status: Some(WithdrawalStatus::Pending),
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    let mine = all.iter().find(|w| w.request.id == requested.request.id).unwrap();
    assert_eq!(mine.account_number, "1234567890");

    let no_note = app
        .state
        .earnings
        .reject(admin_id, requested.request.id, String::new())
        .await;
    assert!(matches!(no_note, Err(AppError::Validation(_))));

    let rejected = app
        .state
        .earnings
        .reject(admin_id, requested.request.id, "Account name mismatch".to_string())
        .await
        .unwrap();
    assert_eq!(rejected.request.status, WithdrawalStatus::Rejected);

    let restored = app.state.earnings.balance(tutor.profile_id).await.unwrap();
    assert_eq!(restored.balance, Decimal::new(500_000, 0));

    let (ledger, total) = app
        .state
        .earnings
        .transactions(tutor.profile_id, Pagination::default())
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(
        ledger.iter().filter(|t| t.transaction_type == TransactionType::Debit).count(),
        1
    );
    assert_eq!(
        ledger.iter().filter(|t| t.transaction_type == TransactionType::Credit).count(),
        1
    );

    let approve_after = app.state.earnings.approve(admin_id, requested.request.id).await;
    assert!(matches!(approve_after, Err(AppError::Conflict { code, .. }) if code == codes::INVALID_STATE_TRANSITION));
}

#[tokio::test]
async fn test_withdrawing_the_whole_balance_then_approving() {
    let Some(app) = setup().await else { return };
    let tutor = tutor(&app.pool).await;
    let admin_id = admin(&app.pool).await;
    seed_balance(&app.pool, tutor.profile_id, Decimal::new(250_000, 0)).await;

    let requested = app
        .state
        .earnings
        .request_withdrawal(tutor.profile_id, withdrawal(250_000))
        .await
        .unwrap();
    let emptied = app.state.earnings.balance(tutor.profile_id).await.unwrap();
    assert_eq!(emptied.balance, Decimal::ZERO);

    let one_more = app
        .state
        .earnings
        .request_withdrawal(tutor.profile_id, withdrawal(1))
        .await;
    assert!(matches!(one_more, Err(AppError::Conflict { code, .. }) if code == codes::INSUFFICIENT_BALANCE));

    let approved = app
        .state
        .earnings
        .approve(admin_id, requested.request.id)
        .await
        .unwrap();
    assert_eq!(approved.request.status, WithdrawalStatus::Approved);
    assert_eq!(approved.request.reviewed_by, Some(admin_id));
    assert_eq!(approved.account_number, "1234567890");

    // Approval settles the hold; nothing is credited back.
    let after = app.state.earnings.balance(tutor.profile_id).await.unwrap();
    assert_eq!(after.balance, Decimal::ZERO);
    let (ledger, total) = app
        .state
        .earnings
        .transactions(tutor.profile_id, Pagination::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(ledger[0].transaction_type, TransactionType::Debit);

    let reject_after = app
        .state
        .earnings
        .reject(admin_id, requested.request.id, "Too late".to_string())
        .await;
    assert!(matches!(reject_after, Err(AppError::Conflict { code, .. }) if code == codes::INVALID_STATE_TRANSITION));
}
