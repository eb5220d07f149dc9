use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Booking;
use crate::services::assignment;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    assigning: bool,
    awaiting_battery: i64,
    awaiting_boat: i64,
    upcoming_confirmed: i64,
    canceled: i64,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let (start, end) = assignment::lookahead_window(Utc::now().date_naive());

    let stats = {
        let db = state.db.lock().unwrap();
        queries::get_fleet_stats(&db, &start, &end)?
    };

    Ok(Json(StatusResponse {
        assigning: state.assigning.load(Ordering::SeqCst),
        awaiting_battery: stats.awaiting_battery,
        awaiting_boat: stats.awaiting_boat,
        upcoming_confirmed: stats.upcoming_confirmed,
        canceled: stats.canceled,
    }))
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct BookingResponse {
    id: String,
    user_id: String,
    rental_at: String,
    status: String,
    battery_id: Option<String>,
    boat_id: Option<String>,
    remark: Option<String>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            user_id: b.user_id,
            rental_at: b.rental_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            status: b.status.as_str().to_string(),
            battery_id: b.battery_id,
            boat_id: b.boat_id,
            remark: b.remark,
        }
    }
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50);
    let bookings = {
        let db = state.db.lock().unwrap();
        queries::upcoming_bookings(&db, query.status.as_deref(), limit)?
    };

    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

// GET /api/admin/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let booking = {
        let db = state.db.lock().unwrap();
        queries::get_booking_by_id(&db, &id)?
    };

    booking
        .map(|b| Json(b.into()))
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

// POST /api/admin/run — trigger an assignment cycle outside the timer.
pub async fn run_assignments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    assignment::process_assignments(&state).await;

    Ok(Json(serde_json::json!({ "ok": true })))
}
