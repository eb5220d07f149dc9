use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{
    Battery, BatteryDetail, BatteryStatus, Boat, BoatStatus, Booking, BookingStatus, User,
};

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT).unwrap_or_else(|_| Utc::now().naive_utc())
}

// ── Bookings ──

const BOOKING_COLUMNS: &str =
    "id, user_id, rental_at, status, battery_id, boat_id, remark, deleted, created_at, updated_at";

fn parse_booking_row(row: &rusqlite::Row) -> rusqlite::Result<Booking> {
    let rental_at_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_at_str: String = row.get(8)?;
    let updated_at_str: String = row.get(9)?;

    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        rental_at: parse_dt(&rental_at_str),
        status: BookingStatus::parse(&status_str),
        battery_id: row.get(4)?,
        boat_id: row.get(5)?,
        remark: row.get(6)?,
        deleted: row.get::<_, i32>(7)? != 0,
        created_at: parse_dt(&created_at_str),
        updated_at: parse_dt(&updated_at_str),
    })
}

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, user_id, rental_at, status, battery_id, boat_id, remark, deleted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            booking.id,
            booking.user_id,
            fmt_dt(&booking.rental_at),
            booking.status.as_str(),
            booking.battery_id,
            booking.boat_id,
            booking.remark,
            booking.deleted as i32,
            fmt_dt(&booking.created_at),
            fmt_dt(&booking.updated_at),
        ],
    )?;
    Ok(())
}

/// Active, non-deleted bookings in the window that still have no battery.
pub fn bookings_needing_battery(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = 'active' AND deleted = 0 AND battery_id IS NULL
           AND rental_at >= ?1 AND rental_at <= ?2
         ORDER BY rental_at ASC",
    ))?;

    let rows = stmt.query_map(params![fmt_dt(start), fmt_dt(end)], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

/// Active, non-deleted bookings in the window that have a battery but no boat.
pub fn bookings_needing_boat(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = 'active' AND deleted = 0
           AND battery_id IS NOT NULL AND boat_id IS NULL
           AND rental_at >= ?1 AND rental_at <= ?2
         ORDER BY rental_at ASC",
    ))?;

    let rows = stmt.query_map(params![fmt_dt(start), fmt_dt(end)], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    );

    match result {
        Ok(booking) => Ok(Some(booking)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn upcoming_bookings(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let now = fmt_dt(&Utc::now().naive_utc());

    let mut bookings = vec![];
    match status_filter {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE deleted = 0 AND rental_at >= ?1 AND status = ?2
                 ORDER BY rental_at ASC LIMIT ?3",
            ))?;
            let rows = stmt.query_map(params![now, status, limit], parse_booking_row)?;
            for row in rows {
                bookings.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE deleted = 0 AND rental_at >= ?1
                 ORDER BY rental_at ASC LIMIT ?2",
            ))?;
            let rows = stmt.query_map(params![now, limit], parse_booking_row)?;
            for row in rows {
                bookings.push(row?);
            }
        }
    }
    Ok(bookings)
}

/// Persist a resource assignment. Both resource columns are written so the
/// boat pass can carry an already-assigned battery through unchanged.
pub fn update_booking_resources(
    conn: &Connection,
    id: &str,
    battery_id: Option<&str>,
    boat_id: Option<&str>,
    status: &BookingStatus,
) -> anyhow::Result<bool> {
    let now = fmt_dt(&Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE bookings SET battery_id = ?1, boat_id = ?2, status = ?3, updated_at = ?4
         WHERE id = ?5",
        params![battery_id, boat_id, status.as_str(), now, id],
    )?;
    Ok(count > 0)
}

/// Status-only transition; remark and resource columns stay untouched.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    status: &BookingStatus,
) -> anyhow::Result<bool> {
    let now = fmt_dt(&Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;
    Ok(count > 0)
}

// ── Batteries ──

pub fn create_battery(conn: &Connection, battery: &Battery) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO batteries (id, name, status, owner_id) VALUES (?1, ?2, ?3, ?4)",
        params![
            battery.id,
            battery.name,
            battery.status.as_str(),
            battery.owner_id
        ],
    )?;
    Ok(())
}

/// Every battery with its derived usage detail: `last_used` is the latest
/// rental among non-canceled bookings, `use_cycles` counts them. Owner
/// contact rides along for hand-off notifications.
pub fn batteries_with_detail(conn: &Connection) -> anyhow::Result<Vec<BatteryDetail>> {
    let mut stmt = conn.prepare(
        "SELECT bt.id, bt.name, bt.status, u.name, u.email, u.phone,
                MAX(bk.rental_at), COUNT(bk.id)
         FROM batteries bt
         JOIN users u ON u.id = bt.owner_id
         LEFT JOIN bookings bk
           ON bk.battery_id = bt.id AND bk.status != 'canceled' AND bk.deleted = 0
         GROUP BY bt.id
         ORDER BY bt.id",
    )?;

    let rows = stmt.query_map([], |row| {
        let status_str: String = row.get(2)?;
        let last_used_str: Option<String> = row.get(6)?;
        Ok(BatteryDetail {
            id: row.get(0)?,
            name: row.get(1)?,
            status: BatteryStatus::parse(&status_str),
            owner_name: row.get(3)?,
            owner_email: row.get(4)?,
            owner_phone: row.get(5)?,
            last_used: last_used_str.map(|s| parse_dt(&s)),
            use_cycles: row.get(7)?,
        })
    })?;

    let mut batteries = vec![];
    for row in rows {
        batteries.push(row?);
    }
    Ok(batteries)
}

// ── Boats ──

pub fn create_boat(conn: &Connection, boat: &Boat) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO boats (id, name, status) VALUES (?1, ?2, ?3)",
        params![boat.id, boat.name, boat.status.as_str()],
    )?;
    Ok(())
}

/// Available boats with their latest non-canceled booking timestamp.
/// A boat with no booking history comes back with `None`.
pub fn available_boats_with_latest(
    conn: &Connection,
) -> anyhow::Result<Vec<(Boat, Option<NaiveDateTime>)>> {
    let mut stmt = conn.prepare(
        "SELECT b.id, b.name, b.status, MAX(bk.rental_at)
         FROM boats b
         LEFT JOIN bookings bk
           ON bk.boat_id = b.id AND bk.status != 'canceled' AND bk.deleted = 0
         WHERE b.status = 'available'
         GROUP BY b.id
         ORDER BY b.id",
    )?;

    let rows = stmt.query_map([], |row| {
        let status_str: String = row.get(2)?;
        let latest_str: Option<String> = row.get(3)?;
        Ok((
            Boat {
                id: row.get(0)?,
                name: row.get(1)?,
                status: BoatStatus::parse(&status_str),
            },
            latest_str.map(|s| parse_dt(&s)),
        ))
    })?;

    let mut boats = vec![];
    for row in rows {
        boats.push(row?);
    }
    Ok(boats)
}

pub fn get_boat(conn: &Connection, id: &str) -> anyhow::Result<Option<Boat>> {
    let result = conn.query_row(
        "SELECT id, name, status FROM boats WHERE id = ?1",
        params![id],
        |row| {
            let status_str: String = row.get(2)?;
            Ok(Boat {
                id: row.get(0)?,
                name: row.get(1)?,
                status: BoatStatus::parse(&status_str),
            })
        },
    );

    match result {
        Ok(boat) => Ok(Some(boat)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Users ──

pub fn create_user(conn: &Connection, user: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, phone) VALUES (?1, ?2, ?3, ?4)",
        params![user.id, user.name, user.email, user.phone],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let result = conn.query_row(
        "SELECT id, name, email, phone FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
            })
        },
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Dashboard ──

pub struct FleetStats {
    pub awaiting_battery: i64,
    pub awaiting_boat: i64,
    pub upcoming_confirmed: i64,
    pub canceled: i64,
}

pub fn get_fleet_stats(
    conn: &Connection,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<FleetStats> {
    let start_str = fmt_dt(start);
    let end_str = fmt_dt(end);

    let count = |sql: &str| -> i64 {
        conn.query_row(sql, params![start_str, end_str], |row| row.get(0))
            .unwrap_or(0)
    };

    Ok(FleetStats {
        awaiting_battery: count(
            "SELECT COUNT(*) FROM bookings
             WHERE status = 'active' AND deleted = 0 AND battery_id IS NULL
               AND rental_at >= ?1 AND rental_at <= ?2",
        ),
        awaiting_boat: count(
            "SELECT COUNT(*) FROM bookings
             WHERE status = 'active' AND deleted = 0
               AND battery_id IS NOT NULL AND boat_id IS NULL
               AND rental_at >= ?1 AND rental_at <= ?2",
        ),
        upcoming_confirmed: count(
            "SELECT COUNT(*) FROM bookings
             WHERE status = 'active' AND deleted = 0
               AND battery_id IS NOT NULL AND boat_id IS NOT NULL
               AND rental_at >= ?1 AND rental_at <= ?2",
        ),
        canceled: count(
            "SELECT COUNT(*) FROM bookings
             WHERE status = 'canceled' AND rental_at >= ?1 AND rental_at <= ?2",
        ),
    })
}
