pub mod battery;
pub mod boat;
pub mod booking;
pub mod user;

pub use battery::{Battery, BatteryDetail, BatteryStatus};
pub use boat::{Boat, BoatStatus};
pub use booking::{Booking, BookingStatus};
pub use user::User;
