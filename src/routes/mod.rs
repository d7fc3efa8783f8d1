pub mod admin;
pub mod auth;
pub mod error;
pub mod health;
pub mod oauth;
pub mod security;
pub mod session;
