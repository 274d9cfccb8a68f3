pub mod auth;
pub mod discovery;
pub mod error;
pub mod health;
pub mod token;
pub mod userinfo;
