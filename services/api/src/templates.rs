use handlebars::Handlebars;
use serde::Serialize;

use lesprivate_common::AppError;

/// Every email the platform sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    BookingRequested,
    BookingReceived,
    BookingAccepted,
    BookingConfirmed,
    BookingDeclined,
    BookingExpired,
    BookingExpiryReminder,
    CourseReminder,
    ReviewRequest,
    ReviewReceived,
    CourseSubmitted,
    CourseApproved,
    CourseRejected,
    PaymentSucceeded,
    PaymentFailed,
    WithdrawalApproved,
    WithdrawalRejected,
}

impl EmailTemplate {
    pub const ALL: [EmailTemplate; 17] = [
        EmailTemplate::BookingRequested,
        EmailTemplate::BookingReceived,
        EmailTemplate::BookingAccepted,
        EmailTemplate::BookingConfirmed,
        EmailTemplate::BookingDeclined,
        EmailTemplate::BookingExpired,
        EmailTemplate::BookingExpiryReminder,
        EmailTemplate::CourseReminder,
        EmailTemplate::ReviewRequest,
        EmailTemplate::ReviewReceived,
        EmailTemplate::CourseSubmitted,
        EmailTemplate::CourseApproved,
        EmailTemplate::CourseRejected,
        EmailTemplate::PaymentSucceeded,
        EmailTemplate::PaymentFailed,
        EmailTemplate::WithdrawalApproved,
        EmailTemplate::WithdrawalRejected,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EmailTemplate::BookingRequested => "booking_requested",
            EmailTemplate::BookingReceived => "booking_received",
            EmailTemplate::BookingAccepted => "booking_accepted",
            EmailTemplate::BookingConfirmed => "booking_confirmed",
            EmailTemplate::BookingDeclined => "booking_declined",
            EmailTemplate::BookingExpired => "booking_expired",
            EmailTemplate::BookingExpiryReminder => "booking_expiry_reminder",
            EmailTemplate::CourseReminder => "course_reminder",
            EmailTemplate::ReviewRequest => "review_request",
            EmailTemplate::ReviewReceived => "review_received",
            EmailTemplate::CourseSubmitted => "course_submitted",
            EmailTemplate::CourseApproved => "course_approved",
            EmailTemplate::CourseRejected => "course_rejected",
            EmailTemplate::PaymentSucceeded => "payment_succeeded",
            EmailTemplate::PaymentFailed => "payment_failed",
            EmailTemplate::WithdrawalApproved => "withdrawal_approved",
            EmailTemplate::WithdrawalRejected => "withdrawal_rejected",
        }
    }

    /// (subject, body) handlebars sources.
    fn sources(&self) -> (&'static str, &'static str) {
        match self {
            EmailTemplate::BookingRequested => (
                "Booking {{code}} sent",
                "Hi {{name}},\n\nYour request for {{course}} on {{date}} at {{time}} ({{timezone}}) was sent to {{tutor}}. \
                 The tutor has until {{expires_at}} to respond.\n\n{{link}}",
            ),
            EmailTemplate::BookingReceived => (
                "New booking request {{code}}",
                "Hi {{name}},\n\n{{student}} would like to book {{course}} on {{date}} at {{time}} ({{timezone}}). \
                 Please accept or decline before {{expires_at}}.\n\n{{link}}",
            ),
            EmailTemplate::BookingAccepted => (
                "Booking {{code}} accepted",
                "Hi {{name}},\n\n{{tutor}} accepted your booking for {{course}} on {{date}} at {{time}} ({{timezone}}).\n\n{{link}}",
            ),
            EmailTemplate::BookingConfirmed => (
                "Booking {{code}} confirmed",
                "Hi {{name}},\n\nYou accepted {{student}}'s booking for {{course}} on {{date}} at {{time}} ({{timezone}}).\n\n{{link}}",
            ),
            EmailTemplate::BookingDeclined => (
                "Booking {{code}} declined",
                "Hi {{name}},\n\n{{tutor}} declined your booking for {{course}}.\n{{#if notes}}Note: {{notes}}\n{{/if}}\n{{link}}",
            ),
            EmailTemplate::BookingExpired => (
                "Booking {{code}} expired",
                "Hi {{name}},\n\nYour booking for {{course}} expired before {{tutor}} responded. You can book another slot.\n\n{{link}}",
            ),
            EmailTemplate::BookingExpiryReminder => (
                "Booking {{code}} is about to expire",
                "Hi {{name}},\n\nThe request from {{student}} for {{course}} expires at {{expires_at}}. Please respond soon.\n\n{{link}}",
            ),
            EmailTemplate::CourseReminder => (
                "Upcoming lesson: {{course}}",
                "Hi {{name}},\n\nYour lesson {{course}} with {{tutor}} starts on {{date}} at {{time}} ({{timezone}}).\n\n{{link}}",
            ),
            EmailTemplate::ReviewRequest => (
                "How was {{course}}?",
                "Hi {{name}},\n\nYour lesson {{course}} has finished. Share a review to help others.\n\n{{link}}",
            ),
            EmailTemplate::ReviewReceived => (
                "You received a new review",
                "Hi {{name}},\n\n{{author}} reviewed booking {{code}}{{#if rate}} with {{rate}} stars{{/if}}.\n\n{{link}}",
            ),
            EmailTemplate::CourseSubmitted => (
                "Course waiting for approval: {{course}}",
                "A course draft for {{course}} was submitted for review.\n\n{{link}}",
            ),
            EmailTemplate::CourseApproved => (
                "Your course {{course}} is live",
                "Hi {{name}},\n\nYour changes to {{course}} were approved and published.\n\n{{link}}",
            ),
            EmailTemplate::CourseRejected => (
                "Your course {{course}} needs changes",
                "Hi {{name}},\n\nYour changes to {{course}} were not approved.\nReason: {{note}}\n\n{{link}}",
            ),
            EmailTemplate::PaymentSucceeded => (
                "Payment {{invoice}} received",
                "Hi {{name}},\n\nWe received your payment of {{currency}} {{amount}}. Premium is active until {{premium_until}}.\n\n{{link}}",
            ),
            EmailTemplate::PaymentFailed => (
                "Payment {{invoice}} was not completed",
                "Hi {{name}},\n\nYour payment of {{currency}} {{amount}} did not go through ({{status}}).\n\n{{link}}",
            ),
            EmailTemplate::WithdrawalApproved => (
                "Withdrawal approved",
                "Hi {{name}},\n\nYour withdrawal of {{amount}} to {{bank}} {{account}} was approved.\n\n{{link}}",
            ),
            EmailTemplate::WithdrawalRejected => (
                "Withdrawal rejected",
                "Hi {{name}},\n\nYour withdrawal of {{amount}} was rejected and returned to your balance.\nReason: {{note}}\n\n{{link}}",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Result<Self, AppError> {
        let mut handlebars = Handlebars::new();
        // Plain-text mail; HTML escaping would mangle names like "O'Neil".
        handlebars.register_escape_fn(handlebars::no_escape);

        for template in EmailTemplate::ALL {
            let (subject, body) = template.sources();
            handlebars
                .register_template_string(&format!("{}.subject", template.name()), subject)
                .map_err(|e| AppError::Internal(format!("Template registration error: {}", e)))?;
            handlebars
                .register_template_string(&format!("{}.body", template.name()), body)
                .map_err(|e| AppError::Internal(format!("Template registration error: {}", e)))?;
        }

        Ok(Self { handlebars })
    }

    pub fn render(
        &self,
        template: EmailTemplate,
        data: &serde_json::Value,
    ) -> Result<RenderedEmail, AppError> {
        let render = |part: &str| {
            self.handlebars
                .render(&format!("{}.{}", template.name(), part), data)
                .map_err(|e| AppError::Internal(format!("Template rendering error: {}", e)))
        };

        Ok(RenderedEmail {
            subject: render("subject")?,
            body: render("body")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_template_registers() {
        assert!(TemplateEngine::new().is_ok());
    }

    #[test]
    fn renders_subject_and_body_without_escaping() {
        let engine = TemplateEngine::new().unwrap();
        let email = engine
            .render(
                EmailTemplate::BookingAccepted,
                &json!({
                    "code": "BK-7Q2X",
                    "name": "Dewi",
                    "tutor": "Pak O'Neil",
                    "course": "Calculus",
                    "date": "2030-04-05",
                    "time": "10:00",
                    "timezone": "Asia/Jakarta",
                    "link": "https://lesprivate.id/bookings/1",
                }),
            )
            .unwrap();

        assert_eq!(email.subject, "Booking BK-7Q2X accepted");
        assert!(email.body.contains("Pak O'Neil accepted"));
        assert!(email.body.ends_with("https://lesprivate.id/bookings/1"));
    }

    #[test]
    fn optional_sections_disappear_when_absent() {
        let engine = TemplateEngine::new().unwrap();
        let email = engine
            .render(
                EmailTemplate::BookingDeclined,
                &json!({ "code": "BK-1", "name": "Dewi", "tutor": "Budi", "course": "Physics" }),
            )
            .unwrap();
        assert!(!email.body.contains("Note:"));
    }
}
