mod routes;
mod static_files;
mod ws;

pub use routes::create_router;
pub use static_files::index_handler;
pub use ws::ws_handler;
