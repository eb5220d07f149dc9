use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveDateTime, Utc};

use crate::db::queries;
use crate::models::{BatteryDetail, Boat, Booking, BookingStatus};
use crate::services::notify::{self, AssignmentNotice};
use crate::state::AppState;

/// Bookings further out than this are left alone; batteries and boats are
/// only committed once the rental is imminent.
pub const LOOKAHEAD_DAYS: u64 = 3;

#[derive(Debug, Clone, Copy)]
enum CancelReason {
    NoBattery,
    NoBoat,
}

impl CancelReason {
    fn describe(&self) -> &'static str {
        match self {
            CancelReason::NoBattery => "no battery was available for your rental date",
            CancelReason::NoBoat => "no boat was available at your rental time",
        }
    }
}

/// Battery candidates for one cycle, ordered longest-idle-first with use
/// cycles as the wear-leveling tie-break. Reserve units only come into play
/// when the available list has nothing left to offer.
pub struct BatteryPool {
    available: Vec<BatteryDetail>,
    reserve: Vec<BatteryDetail>,
}

impl BatteryPool {
    pub fn new(mut batteries: Vec<BatteryDetail>) -> Self {
        batteries.retain(|b| b.status.is_assignable());
        // Never-used batteries (`last_used` = None) sort ahead of everything.
        batteries.sort_by(|a, b| {
            a.last_used
                .cmp(&b.last_used)
                .then(a.use_cycles.cmp(&b.use_cycles))
        });

        let (reserve, available) = batteries
            .into_iter()
            .partition(|b| b.status == crate::models::BatteryStatus::Reserve);

        Self { available, reserve }
    }

    /// Take the highest-priority battery that can serve a rental on
    /// `rental_date`. A claimed battery leaves the pool, so within one cycle
    /// no two bookings can end up with the same unit.
    pub fn claim(&mut self, rental_date: NaiveDate) -> Option<BatteryDetail> {
        take_qualifying(&mut self.available, rental_date)
            .or_else(|| take_qualifying(&mut self.reserve, rental_date))
    }

    pub fn remaining(&self) -> usize {
        self.available.len() + self.reserve.len()
    }
}

// A battery used the same calendar day cannot be swapped out and recharged
// in time, so it never qualifies regardless of priority.
fn take_qualifying(list: &mut Vec<BatteryDetail>, rental_date: NaiveDate) -> Option<BatteryDetail> {
    let idx = list
        .iter()
        .position(|b| b.last_used.map(|dt| dt.date()) != Some(rental_date))?;
    Some(list.remove(idx))
}

/// Pick the longest-idle available boat for a rental at `rental_at`.
/// No booking history counts as maximally idle; a boat whose latest booking
/// sits at the exact rental instant is already spoken for and is skipped.
pub fn pick_boat(
    mut candidates: Vec<(Boat, Option<NaiveDateTime>)>,
    rental_at: NaiveDateTime,
) -> Option<Boat> {
    candidates.retain(|(_, latest)| *latest != Some(rental_at));
    candidates.sort_by(|a, b| a.1.cmp(&b.1));
    candidates.into_iter().next().map(|(boat, _)| boat)
}

pub(crate) fn lookahead_window(today: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = today.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = today
        .checked_add_days(Days::new(LOOKAHEAD_DAYS))
        .unwrap_or(today)
        .and_hms_opt(23, 59, 59)
        .unwrap_or_default();
    (start, end)
}

// Clears the in-flight flag on drop, so even a panic mid-cycle cannot wedge
// every later tick.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run one full assignment cycle: batteries first, then boats. Best-effort
/// periodic job, so nothing here propagates to the caller; every failure is
/// logged and the affected booking is reconsidered next cycle. Overlapping
/// invocations are serialized by skipping the later tick.
pub async fn process_assignments(state: &Arc<AppState>) {
    if state
        .assigning
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::warn!("assignment cycle already in progress, skipping this tick");
        return;
    }
    let _guard = RunGuard(&state.assigning);

    run_cycle(state).await;
}

async fn run_cycle(state: &Arc<AppState>) {
    let (start, end) = lookahead_window(Utc::now().date_naive());

    let (needing_battery, needing_boat) = {
        let db = state.db.lock().unwrap();
        (
            fetch_or_empty(
                "bookings needing battery",
                queries::bookings_needing_battery(&db, &start, &end),
            ),
            fetch_or_empty(
                "bookings needing boat",
                queries::bookings_needing_boat(&db, &start, &end),
            ),
        )
    };

    if needing_battery.is_empty() && needing_boat.is_empty() {
        tracing::debug!("no bookings awaiting resources in the next {LOOKAHEAD_DAYS} days");
        return;
    }

    tracing::info!(
        needing_battery = needing_battery.len(),
        needing_boat = needing_boat.len(),
        "starting assignment cycle"
    );

    if !needing_battery.is_empty() {
        run_battery_pass(state, &needing_battery).await;
    }

    // Bookings that already had a battery; the pass-1 cascade handles the
    // rest. Eligibility is recomputed per booking, no shared pool needed.
    for booking in &needing_boat {
        if let Err(e) = ensure_boat_assigned(state, booking).await {
            tracing::error!(
                booking = %booking.id,
                user = %booking.user_id,
                error = %e,
                "boat assignment failed"
            );
        }
    }
}

fn fetch_or_empty<T>(what: &str, result: anyhow::Result<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to fetch {what}, treating as empty");
        vec![]
    })
}

async fn run_battery_pass(state: &Arc<AppState>, bookings: &[Booking]) {
    // One inventory snapshot per cycle; claims mutate it in place.
    let batteries = {
        let db = state.db.lock().unwrap();
        queries::batteries_with_detail(&db)
    };
    let batteries = match batteries {
        Ok(b) => b,
        Err(e) => {
            // Infrastructure failure, not an empty fleet. Leave the bookings
            // pending for the next cycle rather than canceling them all.
            tracing::error!(error = %e, "battery inventory fetch failed, skipping battery pass");
            return;
        }
    };

    let mut pool = BatteryPool::new(batteries);
    tracing::debug!(candidates = pool.remaining(), "battery pool loaded");

    for booking in bookings {
        if let Err(e) = assign_battery(state, booking, &mut pool).await {
            tracing::error!(
                booking = %booking.id,
                user = %booking.user_id,
                error = %e,
                "battery assignment failed"
            );
        }
    }
}

async fn assign_battery(
    state: &Arc<AppState>,
    booking: &Booking,
    pool: &mut BatteryPool,
) -> anyhow::Result<()> {
    let Some(battery) = pool.claim(booking.rental_at.date()) else {
        return cancel_booking(state, booking, CancelReason::NoBattery).await;
    };

    let updated = {
        let db = state.db.lock().unwrap();
        queries::update_booking_resources(
            &db,
            &booking.id,
            Some(&battery.id),
            booking.boat_id.as_deref(),
            &BookingStatus::Active,
        )?
    };
    if !updated {
        tracing::warn!(booking = %booking.id, "assignment not persisted, leaving for next cycle");
        return Ok(());
    }
    tracing::info!(booking = %booking.id, battery = %battery.id, "battery assigned");

    send_confirmation(state, booking, &battery).await;

    if booking.boat_id.is_none() {
        let mut booking = booking.clone();
        booking.battery_id = Some(battery.id.clone());
        ensure_boat_assigned(state, &booking).await?;
    }

    Ok(())
}

/// Idempotent: the pass-1 cascade and the standalone boat pass both land
/// here, and a booking that already has its boat is a no-op.
async fn ensure_boat_assigned(state: &Arc<AppState>, booking: &Booking) -> anyhow::Result<()> {
    if booking.boat_id.is_some() {
        return Ok(());
    }

    let candidates = {
        let db = state.db.lock().unwrap();
        queries::available_boats_with_latest(&db)
    };
    let candidates = match candidates {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                booking = %booking.id,
                error = %e,
                "boat inventory fetch failed, leaving booking for next cycle"
            );
            return Ok(());
        }
    };

    let Some(boat) = pick_boat(candidates, booking.rental_at) else {
        return cancel_booking(state, booking, CancelReason::NoBoat).await;
    };

    let updated = {
        let db = state.db.lock().unwrap();
        queries::update_booking_resources(
            &db,
            &booking.id,
            booking.battery_id.as_deref(),
            Some(&boat.id),
            &BookingStatus::Active,
        )?
    };
    if updated {
        tracing::info!(booking = %booking.id, boat = %boat.id, "boat assigned");
    } else {
        tracing::warn!(booking = %booking.id, "boat assignment not persisted, leaving for next cycle");
    }

    Ok(())
}

/// Terminal transition: a canceled booking is excluded by the window queries
/// and never reconsidered. Remark and any already-assigned resources stay on
/// the row untouched.
async fn cancel_booking(
    state: &Arc<AppState>,
    booking: &Booking,
    reason: CancelReason,
) -> anyhow::Result<()> {
    let updated = {
        let db = state.db.lock().unwrap();
        queries::update_booking_status(&db, &booking.id, &BookingStatus::Canceled)?
    };
    if !updated {
        tracing::warn!(booking = %booking.id, "cancellation not persisted");
        return Ok(());
    }

    match reason {
        CancelReason::NoBattery => {
            tracing::warn!(booking = %booking.id, user = %booking.user_id, "booking canceled, no battery available");
        }
        CancelReason::NoBoat => {
            tracing::warn!(booking = %booking.id, user = %booking.user_id, "booking canceled, no boat available");
        }
    }

    let user = {
        let db = state.db.lock().unwrap();
        queries::get_user(&db, &booking.user_id)
    };
    match user {
        Ok(Some(user)) => {
            let body = notify::render_cancellation(&user.name, booking.rental_at, reason.describe());
            if let Err(e) = state
                .notifier
                .send(&user.email, notify::CANCELLATION_SUBJECT, &body)
                .await
            {
                tracing::error!(booking = %booking.id, error = %e, "failed to send cancellation notice");
            }
        }
        Ok(None) => {
            tracing::warn!(booking = %booking.id, user = %booking.user_id, "booking user not found, skipping cancellation notice");
        }
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed, skipping cancellation notice");
        }
    }

    Ok(())
}

async fn send_confirmation(state: &Arc<AppState>, booking: &Booking, battery: &BatteryDetail) {
    let (user, boat_name) = {
        let db = state.db.lock().unwrap();
        let user = queries::get_user(&db, &booking.user_id);
        let boat_name = booking
            .boat_id
            .as_deref()
            .and_then(|id| queries::get_boat(&db, id).ok().flatten())
            .map(|b| b.name);
        (user, boat_name)
    };

    let user = match user {
        Ok(Some(u)) => u,
        Ok(None) => {
            tracing::warn!(booking = %booking.id, user = %booking.user_id, "booking user not found, skipping confirmation");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed, skipping confirmation");
            return;
        }
    };

    let body = notify::render_confirmation(&AssignmentNotice {
        user_name: &user.name,
        rental_at: booking.rental_at,
        boat_name: boat_name.as_deref(),
        battery_name: &battery.name,
        owner_name: &battery.owner_name,
        owner_phone: &battery.owner_phone,
        owner_email: &battery.owner_email,
    });

    if let Err(e) = state
        .notifier
        .send(&user.email, notify::CONFIRMATION_SUBJECT, &body)
        .await
    {
        tracing::error!(booking = %booking.id, error = %e, "failed to send confirmation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BatteryStatus;
    use chrono::NaiveDateTime;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn battery(
        id: &str,
        status: BatteryStatus,
        last_used: Option<&str>,
        use_cycles: i64,
    ) -> BatteryDetail {
        BatteryDetail {
            id: id.to_string(),
            name: format!("Pack {id}"),
            status,
            last_used: last_used.map(dt),
            use_cycles,
            owner_name: "Owner".to_string(),
            owner_email: "owner@example.com".to_string(),
            owner_phone: "+15550000000".to_string(),
        }
    }

    fn boat(id: &str) -> Boat {
        Boat {
            id: id.to_string(),
            name: format!("Boat {id}"),
            status: crate::models::BoatStatus::Available,
        }
    }

    #[test]
    fn test_longest_idle_battery_wins() {
        let pool = vec![
            battery("1", BatteryStatus::Available, Some("2025-06-10 09:00"), 4),
            battery("2", BatteryStatus::Available, Some("2025-06-01 09:00"), 9),
            battery("3", BatteryStatus::Available, Some("2025-06-05 09:00"), 1),
        ];

        // Selection must not depend on input ordering.
        for rotation in 0..3 {
            let mut rotated = pool.clone();
            rotated.rotate_left(rotation);
            let mut p = BatteryPool::new(rotated);
            let claimed = p.claim(dt("2025-06-16 10:00").date()).unwrap();
            assert_eq!(claimed.id, "2");
        }
    }

    #[test]
    fn test_never_used_battery_ranks_first() {
        let mut p = BatteryPool::new(vec![
            battery("1", BatteryStatus::Available, Some("2020-01-01 09:00"), 0),
            battery("2", BatteryStatus::Available, None, 0),
        ]);
        assert_eq!(p.claim(dt("2025-06-16 10:00").date()).unwrap().id, "2");
    }

    #[test]
    fn test_use_cycles_break_ties() {
        let mut p = BatteryPool::new(vec![
            battery("1", BatteryStatus::Available, Some("2025-06-01 09:00"), 7),
            battery("2", BatteryStatus::Available, Some("2025-06-01 09:00"), 3),
        ]);
        assert_eq!(p.claim(dt("2025-06-16 10:00").date()).unwrap().id, "2");
    }

    #[test]
    fn test_same_day_battery_excluded() {
        // "1" ranks first (earlier last_used) but was used on the rental
        // date itself, so the worse-ranked "2" must win.
        let mut p = BatteryPool::new(vec![
            battery("1", BatteryStatus::Available, Some("2025-06-18 08:00"), 2),
            battery("2", BatteryStatus::Available, Some("2025-06-20 08:00"), 5),
        ]);
        let claimed = p.claim(dt("2025-06-18 14:00").date()).unwrap();
        assert_eq!(claimed.id, "2");
    }

    #[test]
    fn test_same_day_exclusion_beats_priority_order() {
        // Booking on the 18th, one battery used that same day and one used
        // long ago: the old one wins regardless of ranking.
        let mut p = BatteryPool::new(vec![
            battery("1", BatteryStatus::Available, Some("2025-06-18 08:00"), 2),
            battery("2", BatteryStatus::Available, Some("2025-06-06 08:00"), 5),
        ]);
        let claimed = p.claim(dt("2025-06-18 14:00").date()).unwrap();
        assert_eq!(claimed.id, "2");
    }

    #[test]
    fn test_reserve_only_used_as_fallback() {
        let mut p = BatteryPool::new(vec![
            battery("r", BatteryStatus::Reserve, None, 0),
            battery("a", BatteryStatus::Available, Some("2025-06-01 09:00"), 20),
        ]);
        // Available wins despite the reserve unit being more idle.
        assert_eq!(p.claim(dt("2025-06-16 10:00").date()).unwrap().id, "a");
        // Once available is exhausted the reserve unit is claimable.
        assert_eq!(p.claim(dt("2025-06-16 10:00").date()).unwrap().id, "r");
    }

    #[test]
    fn test_claim_removes_battery_from_pool() {
        let mut p = BatteryPool::new(vec![battery(
            "1",
            BatteryStatus::Available,
            None,
            0,
        )]);
        assert!(p.claim(dt("2025-06-16 10:00").date()).is_some());
        assert!(p.claim(dt("2025-06-17 10:00").date()).is_none());
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn test_out_of_service_batteries_filtered() {
        let mut p = BatteryPool::new(vec![
            battery("1", BatteryStatus::OutOfService, None, 0),
            battery("2", BatteryStatus::InRepair, None, 0),
        ]);
        assert_eq!(p.remaining(), 0);
        assert!(p.claim(dt("2025-06-16 10:00").date()).is_none());
    }

    #[test]
    fn test_all_candidates_same_day_yields_none() {
        let mut p = BatteryPool::new(vec![
            battery("1", BatteryStatus::Available, Some("2025-06-18 08:00"), 2),
            battery("r", BatteryStatus::Reserve, Some("2025-06-18 11:00"), 0),
        ]);
        assert!(p.claim(dt("2025-06-18 14:00").date()).is_none());
    }

    #[test]
    fn test_unbooked_boat_preferred() {
        let picked = pick_boat(
            vec![
                (boat("a"), Some(dt("2025-06-15 10:00"))),
                (boat("b"), None),
            ],
            dt("2025-06-16 10:00"),
        );
        assert_eq!(picked.unwrap().id, "b");
    }

    #[test]
    fn test_longest_idle_boat_wins() {
        let picked = pick_boat(
            vec![
                (boat("a"), Some(dt("2025-06-15 10:00"))),
                (boat("b"), Some(dt("2025-06-02 10:00"))),
                (boat("c"), Some(dt("2025-06-10 10:00"))),
            ],
            dt("2025-06-16 10:00"),
        );
        assert_eq!(picked.unwrap().id, "b");
    }

    #[test]
    fn test_double_booked_boat_excluded() {
        let rental = dt("2025-06-16 10:00");
        let picked = pick_boat(
            vec![
                (boat("a"), Some(rental)),
                (boat("b"), Some(dt("2025-06-15 10:00"))),
            ],
            rental,
        );
        assert_eq!(picked.unwrap().id, "b");
    }

    #[test]
    fn test_no_boat_left_after_exclusion() {
        let rental = dt("2025-06-16 10:00");
        assert!(pick_boat(vec![(boat("a"), Some(rental))], rental).is_none());
    }

    #[test]
    fn test_run_guard_clears_flag_on_panic() {
        let flag = AtomicBool::new(true);
        let result = std::panic::catch_unwind(|| {
            let _guard = RunGuard(&flag);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_lookahead_window_spans_three_days() {
        let (start, end) = lookahead_window(dt("2025-06-16 10:00").date());
        assert_eq!(start, dt("2025-06-16 00:00"));
        assert_eq!(
            end,
            NaiveDateTime::parse_from_str("2025-06-19 23:59:59", "%Y-%m-%d %H:%M:%S").unwrap()
        );
    }
}
