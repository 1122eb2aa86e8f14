pub mod api;
mod handlers;

pub use api::{build_router, ApiServer};
