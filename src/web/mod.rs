mod handlers;
mod index;
mod routes;

pub use routes::create_router;
