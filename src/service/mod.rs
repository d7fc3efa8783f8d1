pub mod auth;
pub mod blacklist;
pub mod device;
pub mod oauth_temp;
pub mod rate_limiter;
pub mod security;
pub mod session;
pub mod token;
