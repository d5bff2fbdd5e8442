pub mod constants;
pub mod relay;
pub mod session;
pub mod speech;
pub mod web_server;
