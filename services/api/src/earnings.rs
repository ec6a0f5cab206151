//! Tutor earnings: cached balance, append-only transaction log, withdrawals.
//!
//! Every balance change goes through [`post_entry`], which locks the balance
//! row, appends one `balance_transactions` row and moves the cached balance by
//! the same amount inside the caller's transaction.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;
use validator::Validate;

use lesprivate_common::{
    codes, AppError, NotificationKind, Pagination, TransactionType, WithdrawalStatus,
};
use lesprivate_database::{BalanceTransaction, Database, MentorBalance, WithdrawalRequest};

use crate::encryption::{last4, mask_account, EncryptionService};
use crate::notifier::{Notice, Notifier};
use crate::templates::EmailTemplate;

pub mod references {
    pub const BOOKING: &str = "booking";
    pub const WITHDRAWAL_HOLD: &str = "withdrawal_hold";
    pub const WITHDRAWAL_RELEASE: &str = "withdrawal_release";
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub tutor_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub reference_type: &'static str,
    pub reference_id: Uuid,
}

impl LedgerEntry {
    fn signed_amount(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => -self.amount,
        }
    }
}

/// Locks (creating if needed) the tutor's balance row and returns the current balance.
pub(crate) async fn lock_balance(conn: &mut PgConnection, tutor_id: Uuid) -> Result<Decimal, AppError> {
    sqlx::query("INSERT INTO mentor_balances (tutor_id) VALUES ($1) ON CONFLICT (tutor_id) DO NOTHING")
        .bind(tutor_id)
        .execute(&mut *conn)
        .await?;

    let balance = sqlx::query_scalar::<_, Decimal>(
        "SELECT balance FROM mentor_balances WHERE tutor_id = $1 FOR UPDATE",
    )
    .bind(tutor_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(balance)
}

/// Appends `entry` and applies it to the cached balance. Returns the new balance.
pub(crate) async fn post_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<Decimal, AppError> {
    if entry.amount <= Decimal::ZERO {
        return Err(AppError::Validation("amount: must be greater than zero".to_string()));
    }

    let current = lock_balance(conn, entry.tutor_id).await?;
    let next = current + entry.signed_amount();
    if next.is_sign_negative() {
        return Err(AppError::conflict(
            codes::INSUFFICIENT_BALANCE,
            "Balance is lower than the requested amount",
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO balance_transactions
            (id, tutor_id, transaction_type, amount, description, reference_type, reference_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.tutor_id)
    .bind(entry.transaction_type)
    .bind(entry.amount)
    .bind(&entry.description)
    .bind(entry.reference_type)
    .bind(entry.reference_id)
    .execute(&mut *conn)
    .await?;

    let balance = sqlx::query_scalar::<_, Decimal>(
        "UPDATE mentor_balances SET balance = balance + $2, updated_at = NOW() WHERE tutor_id = $1 RETURNING balance",
    )
    .bind(entry.tutor_id)
    .bind(entry.signed_amount())
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(
        tutor_id = %entry.tutor_id,
        reference_type = entry.reference_type,
        reference_id = %entry.reference_id,
        amount = %entry.amount,
        %balance,
        "Ledger entry posted"
    );
    Ok(balance)
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalInput {
    pub amount: Decimal,
    #[validate(length(min = 2, max = 100, message = "is required"))]
    pub bank_name: String,
    #[validate(length(min = 6, max = 34, message = "must be 6 to 34 characters"))]
    pub account_number: String,
    #[validate(length(min = 2, max = 150, message = "is required"))]
    pub account_name: String,
}

impl WithdrawalInput {
    fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        if self.amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount: must be greater than zero".to_string()));
        }
        if self.amount.scale() > 2 {
            return Err(AppError::Validation("amount: at most two decimal places".to_string()));
        }
        if !self.account_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation("accountNumber: digits only".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalFilter {
    pub status: Option<WithdrawalStatus>,
}

/// Withdrawal as shown to its owner or an admin; `account_number` is masked or decrypted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalView {
    #[serde(flatten)]
    pub request: WithdrawalRequest,
    pub account_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutor_name: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct WithdrawalRow {
    #[sqlx(flatten)]
    request: WithdrawalRequest,
    tutor_name: String,
    total_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    #[sqlx(flatten)]
    transaction: BalanceTransaction,
    total_count: i64,
}

#[derive(Clone)]
pub struct EarningsLedger {
    db: Database,
    notifier: Notifier,
    encryption: EncryptionService,
}

impl EarningsLedger {
    pub fn new(db: Database, notifier: Notifier, encryption: EncryptionService) -> Self {
        Self {
            db,
            notifier,
            encryption,
        }
    }

    pub async fn balance(&self, tutor_id: Uuid) -> Result<MentorBalance, AppError> {
        let balance = sqlx::query_as::<_, MentorBalance>(
            "SELECT * FROM mentor_balances WHERE tutor_id = $1",
        )
        .bind(tutor_id)
        .fetch_optional(self.db.reader())
        .await?;

        Ok(balance.unwrap_or_else(|| {
            let now = Utc::now();
            MentorBalance {
                tutor_id,
                balance: Decimal::ZERO,
                created_at: now,
                updated_at: now,
            }
        }))
    }

    pub async fn transactions(
        &self,
        tutor_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<BalanceTransaction>, i64), AppError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT *, COUNT(*) OVER() AS total_count
            FROM balance_transactions
            WHERE tutor_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tutor_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.db.reader())
        .await?;

        let total = rows.first().map_or(0, |r| r.total_count);
        Ok((rows.into_iter().map(|r| r.transaction).collect(), total))
    }

    /// Creates a pending withdrawal and debits the balance in the same transaction.
    pub async fn request_withdrawal(
        &self,
        tutor_id: Uuid,
        input: WithdrawalInput,
    ) -> Result<WithdrawalView, AppError> {
        input.check()?;
        let sealed = self.encryption.encrypt(&input.account_number)?;
        let tail = last4(&input.account_number);
        let withdrawal_id = Uuid::new_v4();

        let (request, balance) = self
            .db
            .write(move |tx| {
                let input = input.clone();
                let sealed = sealed.clone();
                let tail = tail.clone();
                Box::pin(async move {
                    let current = lock_balance(&mut **tx, tutor_id).await?;
                    if input.amount > current {
                        return Err(AppError::conflict(
                            codes::INSUFFICIENT_BALANCE,
                            format!("Balance {} is lower than the requested {}", current, input.amount),
                        ));
                    }

                    let request = sqlx::query_as::<_, WithdrawalRequest>(
                        r#"
                        INSERT INTO withdrawal_requests
                            (id, tutor_id, amount, bank_name, account_number_encrypted,
                             account_number_last4, account_name, status)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
                        RETURNING *
                        "#,
                    )
                    .bind(withdrawal_id)
                    .bind(tutor_id)
                    .bind(input.amount)
                    .bind(input.bank_name.trim())
                    .bind(&sealed)
                    .bind(&tail)
                    .bind(input.account_name.trim())
                    .fetch_one(&mut **tx)
                    .await?;

                    let balance = post_entry(
                        &mut **tx,
                        &LedgerEntry {
                            tutor_id,
                            transaction_type: TransactionType::Debit,
                            amount: input.amount,
                            description: "Withdrawal requested".to_string(),
                            reference_type: references::WITHDRAWAL_HOLD,
                            reference_id: withdrawal_id,
                        },
                    )
                    .await?;
                    Ok((request, balance))
                })
            })
            .await?;

        tracing::info!(%withdrawal_id, %tutor_id, amount = %request.amount, %balance, "Withdrawal requested");
        Ok(self.masked(request))
    }

    pub async fn list_for_tutor(
        &self,
        tutor_id: Uuid,
        filter: &WithdrawalFilter,
        page: Pagination,
    ) -> Result<(Vec<WithdrawalView>, i64), AppError> {
        let (rows, total) = self.fetch(Some(tutor_id), filter, page).await?;
        Ok((rows.into_iter().map(|r| self.masked(r.request)).collect(), total))
    }

    pub async fn list_all(
        &self,
        filter: &WithdrawalFilter,
        page: Pagination,
    ) -> Result<(Vec<WithdrawalView>, i64), AppError> {
        let (rows, total) = self.fetch(None, filter, page).await?;
        let views = rows
            .into_iter()
            .map(|r| self.revealed(r.request, Some(r.tutor_name)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((views, total))
    }

    async fn fetch(
        &self,
        tutor_id: Option<Uuid>,
        filter: &WithdrawalFilter,
        page: Pagination,
    ) -> Result<(Vec<WithdrawalRow>, i64), AppError> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            SELECT w.*, u.name AS tutor_name, COUNT(*) OVER() AS total_count
            FROM withdrawal_requests w
            JOIN tutors t ON t.id = w.tutor_id
            JOIN users u ON u.id = t.user_id
            WHERE ($1::uuid IS NULL OR w.tutor_id = $1)
              AND ($2::text IS NULL OR w.status = $2)
            ORDER BY w.created_at DESC, w.id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tutor_id)
        .bind(filter.status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.db.reader())
        .await?;

        let total = rows.first().map_or(0, |r| r.total_count);
        Ok((rows, total))
    }

    pub async fn approve(&self, admin_user_id: Uuid, withdrawal_id: Uuid) -> Result<WithdrawalView, AppError> {
        let (request, tutor_user) = self
            .db
            .write(move |tx| {
                Box::pin(async move {
                    let request = lock_pending(&mut **tx, withdrawal_id).await?;
                    let request = sqlx::query_as::<_, WithdrawalRequest>(
                        r#"
                        UPDATE withdrawal_requests
                        SET status = 'approved', reviewed_by = $2, reviewed_at = NOW(), updated_at = NOW()
                        WHERE id = $1
                        RETURNING *
                        "#,
                    )
                    .bind(request.id)
                    .bind(admin_user_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    let tutor_user = tutor_user_id(&mut **tx, request.tutor_id).await?;
                    Ok((request, tutor_user))
                })
            })
            .await?;

        tracing::info!(%withdrawal_id, %admin_user_id, "Withdrawal approved");
        self.notifier.dispatch(vec![Notice::new(
            tutor_user,
            NotificationKind::Withdrawal,
            "Withdrawal approved",
            format!("Your withdrawal of {} was approved", request.amount),
        )
        .link(self.notifier.url("mentor/withdrawals"))
        .email(
            EmailTemplate::WithdrawalApproved,
            json!({
                "amount": request.amount.to_string(),
                "bank": request.bank_name,
                "account": mask_account(&request.account_number_last4),
            }),
        )]);

        self.revealed(request, None)
    }

    /// Rejects a pending withdrawal and returns the held amount to the balance.
    pub async fn reject(
        &self,
        admin_user_id: Uuid,
        withdrawal_id: Uuid,
        note: String,
    ) -> Result<WithdrawalView, AppError> {
        let note = note.trim().to_string();
        if note.is_empty() {
            return Err(AppError::Validation("note: a rejection reason is required".to_string()));
        }

        let (request, balance, tutor_user) = self
            .db
            .write(move |tx| {
                let note = note.clone();
                Box::pin(async move {
                    let request = lock_pending(&mut **tx, withdrawal_id).await?;
                    let request = sqlx::query_as::<_, WithdrawalRequest>(
                        r#"
                        UPDATE withdrawal_requests
                        SET status = 'rejected', reviewed_by = $2, reviewed_at = NOW(), note = $3, updated_at = NOW()
                        WHERE id = $1
                        RETURNING *
                        "#,
                    )
                    .bind(request.id)
                    .bind(admin_user_id)
                    .bind(&note)
                    .fetch_one(&mut **tx)
                    .await?;

                    let balance = post_entry(
                        &mut **tx,
                        &LedgerEntry {
                            tutor_id: request.tutor_id,
                            transaction_type: TransactionType::Credit,
                            amount: request.amount,
                            description: "Withdrawal rejected".to_string(),
                            reference_type: references::WITHDRAWAL_RELEASE,
                            reference_id: request.id,
                        },
                    )
                    .await?;
                    let tutor_user = tutor_user_id(&mut **tx, request.tutor_id).await?;
                    Ok((request, balance, tutor_user))
                })
            })
            .await?;

        tracing::info!(%withdrawal_id, %admin_user_id, %balance, "Withdrawal rejected");
        self.notifier.dispatch(vec![Notice::new(
            tutor_user,
            NotificationKind::Withdrawal,
            "Withdrawal rejected",
            format!("Your withdrawal of {} was returned to your balance", request.amount),
        )
        .link(self.notifier.url("mentor/withdrawals"))
        .email(
            EmailTemplate::WithdrawalRejected,
            json!({
                "amount": request.amount.to_string(),
                "note": request.note.clone().unwrap_or_default(),
            }),
        )]);

        self.revealed(request, None)
    }

    fn masked(&self, request: WithdrawalRequest) -> WithdrawalView {
        WithdrawalView {
            account_number: mask_account(&request.account_number_last4),
            request,
            tutor_name: None,
        }
    }

    fn revealed(
        &self,
        request: WithdrawalRequest,
        tutor_name: Option<String>,
    ) -> Result<WithdrawalView, AppError> {
        Ok(WithdrawalView {
            account_number: self.encryption.decrypt(&request.account_number_encrypted)?,
            request,
            tutor_name,
        })
    }
}

/// Locks the withdrawal first, then (via `post_entry`) the balance row.
async fn lock_pending(conn: &mut PgConnection, withdrawal_id: Uuid) -> Result<WithdrawalRequest, AppError> {
    let request = sqlx::query_as::<_, WithdrawalRequest>(
        "SELECT * FROM withdrawal_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(withdrawal_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Withdrawal request"))?;

    if request.status != WithdrawalStatus::Pending {
        return Err(AppError::conflict(
            codes::INVALID_STATE_TRANSITION,
            format!("Withdrawal was already {}", status_label(request.status)),
        ));
    }
    Ok(request)
}

fn status_label(status: WithdrawalStatus) -> &'static str {
    match status {
        WithdrawalStatus::Pending => "pending",
        WithdrawalStatus::Approved => "approved",
        WithdrawalStatus::Rejected => "rejected",
    }
}

async fn tutor_user_id(conn: &mut PgConnection, tutor_id: Uuid) -> Result<Uuid, AppError> {
    let user_id = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM tutors WHERE id = $1")
        .bind(tutor_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(amount: &str, account: &str) -> WithdrawalInput {
        WithdrawalInput {
            amount: amount.parse().unwrap(),
            bank_name: "BCA".to_string(),
            account_number: account.to_string(),
            account_name: "Budi Santoso".to_string(),
        }
    }

    #[test]
    fn withdrawal_input_rules() {
        assert!(input("200000", "1234567890").check().is_ok());
        assert!(input("0", "1234567890").check().is_err());
        assert!(input("-5", "1234567890").check().is_err());
        assert!(input("10.005", "1234567890").check().is_err());
        assert!(input("100", "12-34-5678").check().is_err());
        assert!(input("100", "123").check().is_err());
    }

    #[test]
    fn debit_entries_subtract() {
        let entry = LedgerEntry {
            tutor_id: Uuid::nil(),
            transaction_type: TransactionType::Debit,
            amount: Decimal::new(200_000, 0),
            description: String::new(),
            reference_type: references::WITHDRAWAL_HOLD,
            reference_id: Uuid::nil(),
        };
        assert_eq!(entry.signed_amount(), Decimal::new(-200_000, 0));
    }
}
