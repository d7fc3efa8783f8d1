pub mod health;
pub mod lockout;
pub mod login_attempt;
pub mod maintenance;
pub mod oauth;
pub mod rate_limit;
pub mod session;
pub mod suspicious_activity;
pub mod token;
pub mod user;
