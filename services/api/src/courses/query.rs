use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use lesprivate_common::{AppError, ClassType, Pagination};
use lesprivate_database::{CoursePrice, CourseSchedule, Database};

use super::{find_course, load_snapshot, CoursePayload};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Price,
    Rating,
    Recency,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl SortKey {
    fn column(&self) -> &'static str {
        match self {
            SortKey::Price => "hourly_price",
            SortKey::Rating => "rating",
            SortKey::Recency => "published_at",
            SortKey::Distance => "distance_km",
        }
    }

    fn default_order(&self) -> SortOrder {
        match self {
            SortKey::Price | SortKey::Distance => SortOrder::Asc,
            SortKey::Rating | SortKey::Recency => SortOrder::Desc,
        }
    }
}

/// Catalogue filters, all optional. `educationLevels` is comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseFilter {
    pub course_category_id: Option<Uuid>,
    pub sub_category_id: Option<Uuid>,
    pub class_type: Option<ClassType>,
    pub max_price: Option<Decimal>,
    pub min_rating: Option<Decimal>,
    pub free_first_course: Option<bool>,
    pub education_levels: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,
    pub max_response_minutes: Option<i32>,
    pub sort: Option<SortKey>,
    pub order: Option<SortOrder>,
}

impl CourseFilter {
    fn origin(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    fn levels(&self) -> Vec<String> {
        self.education_levels
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect()
    }

    fn check(&self) -> Result<(), AppError> {
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(AppError::Validation("latitude: must be within -90..90".to_string()));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(AppError::Validation("longitude: must be within -180..180".to_string()));
            }
        }
        if self.latitude.is_some() != self.longitude.is_some() {
            return Err(AppError::Validation(
                "latitude: latitude and longitude go together".to_string(),
            ));
        }
        if self.radius_km.is_some() && self.origin().is_none() {
            return Err(AppError::Validation(
                "radiusKm: a radius needs latitude and longitude".to_string(),
            ));
        }
        if matches!(self.radius_km, Some(r) if r <= 0.0) {
            return Err(AppError::Validation("radiusKm: must be positive".to_string()));
        }
        if self.sort == Some(SortKey::Distance) && self.origin().is_none() {
            return Err(AppError::Validation(
                "sort: distance sorting needs latitude and longitude".to_string(),
            ));
        }
        Ok(())
    }

    /// Stored class types that can host the requested lesson type.
    fn class_types(&self) -> Option<Vec<String>> {
        self.class_type.map(|requested| {
            [ClassType::Online, ClassType::Offline, ClassType::Both]
                .into_iter()
                .filter(|offered| offered.supports(requested))
                .map(|offered| offered.as_str().to_string())
                .collect()
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopReview {
    pub student_name: String,
    pub rate: Option<i16>,
    pub review: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTierView {
    pub duration_minutes: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleView {
    pub weekday: i16,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseCard {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub class_type: ClassType,
    pub is_free_first_course: bool,
    pub category_id: Uuid,
    pub category_name: String,
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub rating: Decimal,
    pub total_reviews: i32,
    pub response_time_minutes: Option<i32>,
    pub hourly_price: Option<Decimal>,
    pub distance_km: Option<f64>,
    pub published_at: Option<DateTime<Utc>>,
    pub prices: Vec<PriceTierView>,
    pub schedules: Vec<ScheduleView>,
    pub top_reviews: Vec<TopReview>,
}

#[derive(Debug, FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    description: String,
    class_type: ClassType,
    is_free_first_course: bool,
    course_category_id: Uuid,
    category_name: String,
    tutor_id: Uuid,
    tutor_name: String,
    rating: Decimal,
    total_reviews: i32,
    response_time_minutes: Option<i32>,
    hourly_price: Option<Decimal>,
    distance_km: Option<f64>,
    published_at: Option<DateTime<Utc>>,
    total_count: i64,
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    course_id: Uuid,
    student_name: String,
    rate: Option<i16>,
    review: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Published course with everything the detail page shows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedCourse {
    pub id: Uuid,
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub rating: Decimal,
    pub total_reviews: i32,
    pub hourly_price: Option<Decimal>,
    pub distance_km: Option<f64>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub content: CoursePayload,
    pub top_reviews: Vec<TopReview>,
}

/// Great-circle distance by the spherical law of cosines.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let delta = (lon2 - lon1).to_radians();
    let cos = p1.cos() * p2.cos() * delta.cos() + p1.sin() * p2.sin();
    EARTH_RADIUS_KM * cos.clamp(-1.0, 1.0).acos()
}

const TOP_REVIEWS: i64 = 3;

/// Read-only catalogue over published snapshots.
#[derive(Clone)]
pub struct CourseQueryEngine {
    db: Database,
}

impl CourseQueryEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn search(
        &self,
        filter: &CourseFilter,
        page: Pagination,
    ) -> Result<(Vec<CourseCard>, i64), AppError> {
        filter.check()?;
        let origin = filter.origin();

        let mut q: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT * , COUNT(*) OVER() AS total_count FROM (
                SELECT c.id, c.title, c.description, c.class_type, c.is_free_first_course,
                       c.course_category_id, cc.name AS category_name, c.tutor_id, u.name AS tutor_name,
                       t.rating, t.total_reviews, t.response_time_minutes, c.published_at,
                       COALESCE(
                           (SELECT p.price FROM course_prices p WHERE p.course_id = c.id AND p.duration_minutes = 60),
                           (SELECT ROUND(p.price * 60 / p.duration_minutes, 2) FROM course_prices p
                            WHERE p.course_id = c.id ORDER BY p.duration_minutes LIMIT 1)
                       ) AS hourly_price,
            "#,
        );

        match origin {
            Some((lat, lon)) => {
                q.push("6371.0 * ACOS(LEAST(1.0, GREATEST(-1.0, COS(RADIANS(")
                    .push_bind(lat)
                    .push(")) * COS(RADIANS(t.latitude)) * COS(RADIANS(t.longitude) - RADIANS(")
                    .push_bind(lon)
                    .push(")) + SIN(RADIANS(")
                    .push_bind(lat)
                    .push(")) * SIN(RADIANS(t.latitude))))) AS distance_km");
            }
            None => {
                q.push("NULL::DOUBLE PRECISION AS distance_km");
            }
        }

        q.push(
            r#"
                FROM courses c
                JOIN tutors t ON t.id = c.tutor_id
                JOIN users u ON u.id = t.user_id
                JOIN course_categories cc ON cc.id = c.course_category_id
                WHERE c.deleted_at IS NULL AND c.published_at IS NOT NULL
                  AND t.is_active AND u.deleted_at IS NULL
            "#,
        );

        if let Some(category_id) = filter.course_category_id {
            q.push(" AND c.course_category_id = ").push_bind(category_id);
        }
        if let Some(sub_category_id) = filter.sub_category_id {
            q.push(" AND EXISTS (SELECT 1 FROM course_sub_categories s WHERE s.course_id = c.id AND s.sub_course_category_id = ")
                .push_bind(sub_category_id)
                .push(")");
        }
        if let Some(class_types) = filter.class_types() {
            q.push(" AND c.class_type = ANY(").push_bind(class_types).push(")");
        }
        if let Some(min_rating) = filter.min_rating {
            q.push(" AND t.rating >= ").push_bind(min_rating);
        }
        if let Some(free) = filter.free_first_course {
            q.push(" AND c.is_free_first_course = ").push_bind(free);
        }
        let levels = filter.levels();
        if !levels.is_empty() {
            q.push(" AND EXISTS (SELECT 1 FROM course_education_levels el WHERE el.course_id = c.id AND el.education_level = ANY(")
                .push_bind(levels)
                .push("))");
        }
        if let Some(minutes) = filter.max_response_minutes {
            q.push(" AND t.response_time_minutes <= ").push_bind(minutes);
        }

        q.push(") listing WHERE TRUE");
        if let Some(max_price) = filter.max_price {
            q.push(" AND hourly_price <= ").push_bind(max_price);
        }
        if let Some(radius) = filter.radius_km {
            q.push(" AND distance_km <= ").push_bind(radius);
        }

        let sort = filter.sort.unwrap_or(SortKey::Recency);
        let order = filter.order.unwrap_or_else(|| sort.default_order());
        q.push(format!(
            " ORDER BY {} {} NULLS LAST, id LIMIT ",
            sort.column(),
            order.sql()
        ))
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

        let rows: Vec<CourseRow> = q.build_query_as().fetch_all(self.db.reader()).await?;
        let total = rows.first().map(|r| r.total_count).unwrap_or(0);
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let mut prices = self.prices_for(&ids).await?;
        let mut schedules = self.schedules_for(&ids).await?;
        let mut reviews = self.top_reviews_for(&ids).await?;

        let cards = rows
            .into_iter()
            .map(|row| CourseCard {
                prices: prices.remove(&row.id).unwrap_or_default(),
                schedules: schedules.remove(&row.id).unwrap_or_default(),
                top_reviews: reviews.remove(&row.id).unwrap_or_default(),
                id: row.id,
                title: row.title,
                description: row.description,
                class_type: row.class_type,
                is_free_first_course: row.is_free_first_course,
                category_id: row.course_category_id,
                category_name: row.category_name,
                tutor_id: row.tutor_id,
                tutor_name: row.tutor_name,
                rating: row.rating,
                total_reviews: row.total_reviews,
                response_time_minutes: row.response_time_minutes,
                hourly_price: row.hourly_price,
                distance_km: row.distance_km,
                published_at: row.published_at,
            })
            .collect();

        Ok((cards, total))
    }

    async fn prices_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<PriceTierView>>, AppError> {
        let rows = sqlx::query_as::<_, CoursePrice>(
            "SELECT * FROM course_prices WHERE course_id = ANY($1) ORDER BY duration_minutes",
        )
        .bind(ids)
        .fetch_all(self.db.reader())
        .await?;

        let mut grouped: HashMap<Uuid, Vec<PriceTierView>> = HashMap::new();
        for row in rows {
            grouped.entry(row.course_id).or_default().push(PriceTierView {
                duration_minutes: row.duration_minutes,
                price: row.price,
            });
        }
        Ok(grouped)
    }

    async fn schedules_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<ScheduleView>>, AppError> {
        let rows = sqlx::query_as::<_, CourseSchedule>(
            "SELECT * FROM course_schedules WHERE course_id = ANY($1) ORDER BY weekday, start_time",
        )
        .bind(ids)
        .fetch_all(self.db.reader())
        .await?;

        let mut grouped: HashMap<Uuid, Vec<ScheduleView>> = HashMap::new();
        for row in rows {
            grouped.entry(row.course_id).or_default().push(ScheduleView {
                weekday: row.weekday,
                start_time: row.start_time,
                end_time: row.end_time,
            });
        }
        Ok(grouped)
    }

    async fn top_reviews_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<TopReview>>, AppError> {
        let rows = sqlx::query_as::<_, ReviewRow>(
            r#"
            SELECT course_id, student_name, rate, review, updated_at FROM (
                SELECT b.course_id, u.name AS student_name, r.rate, r.review, r.updated_at,
                       ROW_NUMBER() OVER (
                           PARTITION BY b.course_id ORDER BY r.rate DESC NULLS LAST, r.updated_at DESC
                       ) AS review_rank
                FROM student_reviews r
                JOIN bookings b ON b.id = r.booking_id
                JOIN students s ON s.id = r.student_id
                JOIN users u ON u.id = s.user_id
                WHERE b.course_id = ANY($1) AND r.is_submitted AND r.deleted_at IS NULL
            ) ranked
            WHERE review_rank <= $2
            ORDER BY course_id, review_rank
            "#,
        )
        .bind(ids)
        .bind(TOP_REVIEWS)
        .fetch_all(self.db.reader())
        .await?;

        let mut grouped: HashMap<Uuid, Vec<TopReview>> = HashMap::new();
        for row in rows {
            grouped.entry(row.course_id).or_default().push(TopReview {
                student_name: row.student_name,
                rate: row.rate,
                review: row.review,
                updated_at: row.updated_at,
            });
        }
        Ok(grouped)
    }

    /// Public detail page. Unpublished and deleted courses are not found.
    pub async fn detail(
        &self,
        course_id: Uuid,
        origin: Option<(f64, f64)>,
    ) -> Result<PublishedCourse, AppError> {
        let mut conn = self.db.reader().acquire().await?;
        let course = find_course(&mut conn, course_id, false).await?;
        if course.published_at.is_none() || course.deleted_at.is_some() {
            return Err(AppError::not_found("Course"));
        }

        let tutor = sqlx::query_as::<_, (String, Decimal, i32, Option<f64>, Option<f64>, bool)>(
            r#"
            SELECT u.name, t.rating, t.total_reviews, t.latitude, t.longitude, t.is_active
            FROM tutors t JOIN users u ON u.id = t.user_id
            WHERE t.id = $1
            "#,
        )
        .bind(course.tutor_id)
        .fetch_one(&mut *conn)
        .await?;
        let (tutor_name, rating, total_reviews, lat, lon, active) = tutor;
        if !active {
            return Err(AppError::not_found("Course"));
        }

        let content = load_snapshot(&mut conn, &course).await?;
        drop(conn);

        let distance_km = match (origin, lat.zip(lon)) {
            (Some((from_lat, from_lon)), Some((lat, lon))) => Some(distance_km(from_lat, from_lon, lat, lon)),
            _ => None,
        };
        let top_reviews = self
            .top_reviews_for(&[course.id])
            .await?
            .remove(&course.id)
            .unwrap_or_default();

        Ok(PublishedCourse {
            id: course.id,
            tutor_id: course.tutor_id,
            tutor_name,
            rating,
            total_reviews,
            hourly_price: content.hourly_price(),
            distance_km,
            published_at: course.published_at,
            content,
            top_reviews,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_jakarta_and_bandung() {
        let d = distance_km(-6.2088, 106.8456, -6.9175, 107.6191);
        assert!((d - 116.0).abs() < 3.0, "got {}", d);
        assert!(distance_km(-6.2, 106.8, -6.2, 106.8) < 1e-6);
    }

    #[test]
    fn class_type_filter_includes_both() {
        let filter = CourseFilter {
            class_type: Some(ClassType::Online),
            ..Default::default()
        };
        assert_eq!(
            filter.class_types(),
            Some(vec!["online".to_string(), "both".to_string()])
        );

        let filter = CourseFilter {
            class_type: Some(ClassType::Both),
            ..Default::default()
        };
        assert_eq!(filter.class_types(), Some(vec!["both".to_string()]));
    }

    #[test]
    fn radius_requires_origin() {
        let filter = CourseFilter {
            radius_km: Some(5.0),
            ..Default::default()
        };
        assert_eq!(filter.check().unwrap_err().status_code(), 400);

        let filter = CourseFilter {
            latitude: Some(-6.2),
            longitude: Some(106.8),
            radius_km: Some(5.0),
            sort: Some(SortKey::Distance),
            ..Default::default()
        };
        assert!(filter.check().is_ok());
    }

    #[test]
    fn education_levels_are_split_and_normalised() {
        let filter = CourseFilter {
            education_levels: Some(" SMA, smp ,,".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.levels(), vec!["sma".to_string(), "smp".to_string()]);
    }

    #[test]
    fn sort_defaults() {
        assert_eq!(SortKey::Price.default_order(), SortOrder::Asc);
        assert_eq!(SortKey::Rating.default_order(), SortOrder::Desc);
        assert_eq!(SortKey::Recency.column(), "published_at");
    }
}
