pub mod dev;
mod health;
mod profile;

pub use dev::{dev_status, seed_facility};
pub use health::health_check;
pub use profile::current_user;
