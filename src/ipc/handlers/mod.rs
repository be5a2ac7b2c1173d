pub mod accounts;
pub mod billing;
pub mod branches;
pub mod core;
pub mod enrollments;
pub mod inventory;
pub mod releases;
pub mod reservations;
pub mod roster;
