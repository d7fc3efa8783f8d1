pub mod lockout;
pub mod login_attempt;
pub mod postgres_repository;
pub mod suspicious_activity;
pub mod user;
