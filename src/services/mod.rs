pub mod assignment;
pub mod notify;
