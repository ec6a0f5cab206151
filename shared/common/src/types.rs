use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Tutor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Tutor => "tutor",
            UserRole::Admin => "admin",
        }
    }
}

/// Visibility state of a live course row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    WaitingForApproval,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum ClassType {
    Online,
    Offline,
    Both,
}

impl ClassType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassType::Online => "online",
            ClassType::Offline => "offline",
            ClassType::Both => "both",
        }
    }

    pub fn needs_location(&self) -> bool {
        matches!(self, ClassType::Offline | ClassType::Both)
    }

    /// Whether a course offered as `self` can host a lesson of `requested`.
    pub fn supports(&self, requested: ClassType) -> bool {
        match (self, requested) {
            (_, ClassType::Both) => *self == ClassType::Both,
            (ClassType::Both, _) => true,
            (offered, requested) => *offered == requested,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Declined => "declined",
            BookingStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
        }
    }

    /// Payments only ever leave `pending`, and only once.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        *self == PaymentStatus::Pending && next != PaymentStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Pending => "PENDING",
        }
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active | Paused | Cancelled | Expired)
                | (Active, Paused | Cancelled | Expired)
                | (Paused, Active | Cancelled | Expired)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum SubscriptionInterval {
    Monthly,
    Yearly,
}

impl SubscriptionInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionInterval::Monthly => "monthly",
            SubscriptionInterval::Yearly => "yearly",
        }
    }

    pub fn months(&self, count: i32) -> u32 {
        let per = match self {
            SubscriptionInterval::Monthly => 1,
            SubscriptionInterval::Yearly => 12,
        };
        (per * count.max(1)) as u32
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum MentorStudentStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum NotificationKind {
    Course,
    Booking,
    Review,
    Payment,
    Subscription,
    Withdrawal,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

/// `?page=&pageSize=` query parameters, 1-based.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default = "Pagination::default_page")]
    pub page: i64,
    #[serde(default = "Pagination::default_page_size")]
    pub page_size: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: Self::default_page(),
            page_size: Self::default_page_size(),
        }
    }
}

impl Pagination {
    pub const MAX_PAGE_SIZE: i64 = 100;

    fn default_page() -> i64 {
        1
    }

    fn default_page_size() -> i64 {
        20
    }

    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit()
    }

    pub fn metadata(&self, total: i64) -> PageMetadata {
        PageMetadata {
            page: self.page.max(1),
            page_size: self.limit(),
            total,
        }
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PageMetadata>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status_code: 200,
            success: true,
            message: "success".to_string(),
            error: None,
            code: None,
            data: Some(data),
            metadata: None,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status_code: 201,
            ..Self::success(data)
        }
    }

    pub fn paged(data: T, metadata: PageMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::success(data)
        }
    }

    pub fn error(status_code: u16, message: String, code: &str) -> Self {
        Self {
            status_code,
            success: false,
            error: Some(message.clone()),
            message,
            code: Some(code.to_string()),
            data: None,
            metadata: None,
        }
    }
}

impl ApiResponse<()> {
    /// Acknowledgement with no payload.
    pub fn ok() -> Self {
        Self {
            data: None,
            ..Self::success(())
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_camel_case_and_skips_empty_fields() {
        let body = serde_json::to_value(ApiResponse::paged(
            vec![1, 2],
            Pagination::default().metadata(42),
        ))
        .unwrap();

        assert_eq!(body["statusCode"], 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["metadata"]["pageSize"], 20);
        assert_eq!(body["metadata"]["total"], 42);
        assert!(body.get("error").is_none());
        assert!(body.get("code").is_none());
    }

    #[test]
    fn error_envelope_carries_code() {
        let body =
            serde_json::to_value(ApiResponse::<()>::error(409, "nope".into(), "CONFLICT")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "CONFLICT");
        assert!(body.get("data").is_none());
    }

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination { page: 0, page_size: 1000 };
        assert_eq!(p.limit(), Pagination::MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let p = Pagination { page: 3, page_size: 10 };
        assert_eq!(p.offset(), 20);
    }

    #[test]
    fn subscription_status_map() {
        use SubscriptionStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Paused.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Active.can_transition_to(Pending));
        assert_eq!(
            serde_json::to_value(Active).unwrap(),
            serde_json::json!("ACTIVE")
        );
    }

    #[test]
    fn payment_leaves_pending_once() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Failed));
    }

    #[test]
    fn class_type_support() {
        assert!(ClassType::Both.supports(ClassType::Online));
        assert!(ClassType::Online.supports(ClassType::Online));
        assert!(!ClassType::Online.supports(ClassType::Offline));
        assert!(!ClassType::Offline.supports(ClassType::Both));
    }
}
