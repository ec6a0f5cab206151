use std::collections::HashSet;

use chrono::{NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use lesprivate_common::{AppError, ClassType};
use lesprivate_database::{CoursePrice, CourseSchedule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTier {
    pub duration_minutes: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    /// 0 = Sunday .. 6 = Saturday
    pub weekday: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Full editable content of a course, stored verbatim in `course_drafts.payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CoursePayload {
    #[validate(length(min = 3, max = 150, message = "must be 3 to 150 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000, message = "is too long"))]
    pub description: String,
    pub course_category_id: Uuid,
    #[serde(default)]
    pub sub_category_ids: Vec<Uuid>,
    #[validate(length(min = 1, message = "needs at least one education level"))]
    pub education_levels: Vec<String>,
    #[validate(length(min = 1, message = "needs at least one price tier"))]
    pub prices: Vec<PriceTier>,
    #[validate(length(min = 1, message = "needs at least one schedule slot"))]
    pub schedules: Vec<ScheduleSlot>,
    pub class_type: ClassType,
    #[serde(default)]
    pub is_free_first_course: bool,
    #[validate(range(min = 1, max = 168, message = "must be between 1 and 168 hours"))]
    pub expiration_hours: Option<i32>,
}

impl CoursePayload {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, AppError> {
        serde_json::from_value(value.clone())
            .map_err(|e| AppError::Internal(format!("Stored course draft is unreadable: {}", e)))
    }

    pub fn to_value(&self) -> Result<serde_json::Value, AppError> {
        serde_json::to_value(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode course draft: {}", e)))
    }

    /// Field validation plus the cross-field rules an approved course must satisfy.
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;

        let mut durations = HashSet::new();
        for tier in &self.prices {
            if tier.duration_minutes <= 0 || tier.duration_minutes > 24 * 60 {
                return Err(AppError::Validation(
                    "prices: duration must be between 1 and 1440 minutes".to_string(),
                ));
            }
            if tier.price.is_sign_negative() {
                return Err(AppError::Validation("prices: price cannot be negative".to_string()));
            }
            if !durations.insert(tier.duration_minutes) {
                return Err(AppError::Validation(format!(
                    "prices: duplicate tier for {} minutes",
                    tier.duration_minutes
                )));
            }
        }

        for (i, slot) in self.schedules.iter().enumerate() {
            if !(0..=6).contains(&slot.weekday) {
                return Err(AppError::Validation(
                    "schedules: weekday must be between 0 (Sunday) and 6".to_string(),
                ));
            }
            if slot.end_time <= slot.start_time {
                return Err(AppError::Validation(
                    "schedules: end time must be after start time".to_string(),
                ));
            }
            let overlaps = self.schedules[i + 1..].iter().any(|other| {
                other.weekday == slot.weekday
                    && other.start_time < slot.end_time
                    && slot.start_time < other.end_time
            });
            if overlaps {
                return Err(AppError::Validation(format!(
                    "schedules: overlapping slots on weekday {}",
                    slot.weekday
                )));
            }
        }

        if self.education_levels.iter().any(|l| l.trim().is_empty()) {
            return Err(AppError::Validation(
                "educationLevels: entries cannot be blank".to_string(),
            ));
        }

        Ok(())
    }

    pub fn hourly_price(&self) -> Option<Decimal> {
        hourly_price(self.prices.iter().map(|t| (t.duration_minutes, t.price)))
    }

    /// Rebuilds a payload from the published child rows.
    pub fn from_snapshot(
        course: &lesprivate_database::Course,
        sub_category_ids: Vec<Uuid>,
        education_levels: Vec<String>,
        prices: &[CoursePrice],
        schedules: &[CourseSchedule],
    ) -> Self {
        Self {
            title: course.title.clone(),
            description: course.description.clone(),
            course_category_id: course.course_category_id,
            sub_category_ids,
            education_levels,
            prices: prices
                .iter()
                .map(|p| PriceTier {
                    duration_minutes: p.duration_minutes,
                    price: p.price,
                })
                .collect(),
            schedules: schedules
                .iter()
                .map(|s| ScheduleSlot {
                    weekday: s.weekday,
                    start_time: s.start_time,
                    end_time: s.end_time,
                })
                .collect(),
            class_type: course.class_type,
            is_free_first_course: course.is_free_first_course,
            expiration_hours: Some(course.expiration_hours),
        }
    }
}

/// Price of one hour: the 60-minute tier when offered, otherwise the shortest
/// tier prorated to 60 minutes.
pub fn hourly_price(tiers: impl IntoIterator<Item = (i32, Decimal)>) -> Option<Decimal> {
    let mut shortest: Option<(i32, Decimal)> = None;
    for (minutes, price) in tiers {
        if minutes == 60 {
            return Some(price);
        }
        if minutes > 0 && shortest.map_or(true, |(m, _)| minutes < m) {
            shortest = Some((minutes, price));
        }
    }
    shortest.map(|(minutes, price)| (price * Decimal::from(60) / Decimal::from(minutes)).round_dp(2))
}

/// Whether a one-hour lesson starting at `start` on `weekday` fits entirely in a slot.
pub fn fits_schedule<'a>(
    slots: impl IntoIterator<Item = &'a ScheduleSlot>,
    weekday: i16,
    start: NaiveTime,
) -> bool {
    // Lessons may not run past midnight.
    if start.hour() >= 23 {
        return false;
    }
    let end = start + chrono::Duration::hours(1);
    slots
        .into_iter()
        .any(|slot| slot.weekday == weekday && slot.start_time <= start && end <= slot.end_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample() -> CoursePayload {
        serde_json::from_value(json!({
            "title": "Calculus for high school",
            "description": "Limits, derivatives and integrals.",
            "courseCategoryId": Uuid::nil(),
            "educationLevels": ["sma"],
            "prices": [
                { "durationMinutes": 60, "price": "150000" },
                { "durationMinutes": 90, "price": "210000" }
            ],
            "schedules": [
                { "weekday": 5, "startTime": "09:00:00", "endTime": "12:00:00" }
            ],
            "classType": "online"
        }))
        .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn sample_payload_is_consistent() {
        let payload = sample();
        assert!(payload.check().is_ok());
        assert_eq!(payload.expiration_hours, None);
        assert!(!payload.is_free_first_course);
    }

    #[test]
    fn duplicate_durations_are_rejected() {
        let mut payload = sample();
        payload.prices.push(PriceTier {
            duration_minutes: 60,
            price: Decimal::new(1, 0),
        });
        assert!(payload.check().is_err());
    }

    #[test]
    fn overlapping_slots_are_rejected() {
        let mut payload = sample();
        payload.schedules.push(ScheduleSlot {
            weekday: 5,
            start_time: time(11, 0),
            end_time: time(13, 0),
        });
        let err = payload.check().unwrap_err();
        assert!(err.public_message().contains("overlapping"));

        payload.schedules[1].weekday = 6;
        assert!(payload.check().is_ok());
    }

    #[test]
    fn empty_collections_fail_validation() {
        let mut payload = sample();
        payload.schedules.clear();
        assert_eq!(payload.check().unwrap_err().status_code(), 400);
    }

    #[test]
    fn hourly_price_prefers_the_hour_tier() {
        let tiers = vec![(30, Decimal::new(80_000, 0)), (60, Decimal::new(150_000, 0))];
        assert_eq!(hourly_price(tiers), Some(Decimal::new(150_000, 0)));

        let tiers = vec![(90, Decimal::new(210_000, 0)), (45, Decimal::new(90_000, 0))];
        assert_eq!(hourly_price(tiers), Some(Decimal::new(120_000, 0)));

        assert_eq!(hourly_price(Vec::new()), None);
    }

    #[test]
    fn lesson_must_fit_inside_a_slot() {
        let slots = sample().schedules;
        assert!(fits_schedule(&slots, 5, time(9, 0)));
        assert!(fits_schedule(&slots, 5, time(11, 0)));
        assert!(!fits_schedule(&slots, 5, time(11, 30)));
        assert!(!fits_schedule(&slots, 4, time(10, 0)));
    }

    #[test]
    fn late_starts_never_wrap_midnight() {
        let slots = vec![ScheduleSlot {
            weekday: 1,
            start_time: time(0, 0),
            end_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        }];
        assert!(fits_schedule(&slots, 1, time(22, 0)));
        assert!(!fits_schedule(&slots, 1, time(23, 30)));
    }
}
