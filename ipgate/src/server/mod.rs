pub mod context;
pub mod listener;
pub mod proxy;
pub mod response;
pub mod routes;
