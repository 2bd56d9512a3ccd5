pub mod auth;
pub mod client;
pub mod protocol;
pub mod reply;
pub mod sse;
pub mod stream;
pub mod ui;
