pub mod mailgun;

use async_trait::async_trait;
use chrono::NaiveDateTime;

pub const CONFIRMATION_SUBJECT: &str = "Your boat rental is confirmed";
pub const CANCELLATION_SUBJECT: &str = "Your boat rental was canceled";

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Everything a renter needs after assignment: what they got and who to
/// call to pick up the battery.
pub struct AssignmentNotice<'a> {
    pub user_name: &'a str,
    pub rental_at: NaiveDateTime,
    pub boat_name: Option<&'a str>,
    pub battery_name: &'a str,
    pub owner_name: &'a str,
    pub owner_phone: &'a str,
    pub owner_email: &'a str,
}

pub fn render_confirmation(notice: &AssignmentNotice) -> String {
    let when = notice.rental_at.format("%A %B %-d at %H:%M");
    let boat_line = match notice.boat_name {
        Some(name) => format!("Boat: {name}"),
        None => "Boat: assigned shortly".to_string(),
    };

    format!(
        "Hi {},\n\n\
         Your rental on {when} is confirmed.\n\n\
         Battery: {}\n\
         {boat_line}\n\n\
         For battery hand-off, contact {} ({}, {}).\n",
        notice.user_name,
        notice.battery_name,
        notice.owner_name,
        notice.owner_phone,
        notice.owner_email,
    )
}

pub fn render_cancellation(user_name: &str, rental_at: NaiveDateTime, reason: &str) -> String {
    let when = rental_at.format("%A %B %-d at %H:%M");
    format!(
        "Hi {user_name},\n\n\
         We're sorry: your rental on {when} had to be canceled because {reason}.\n\n\
         Please get in touch to rebook on another date.\n",
    )
}
