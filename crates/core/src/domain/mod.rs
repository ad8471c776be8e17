pub mod booking;
pub mod time;
pub mod token;
pub mod user;
