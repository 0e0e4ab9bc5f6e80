pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod shipments;
pub mod tracking;

pub use routes::create_router;
