pub mod app;
pub mod error;
pub mod routes;
pub mod source;
pub mod state;
pub mod sync;
