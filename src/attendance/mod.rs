pub mod registry;
pub mod service;
pub mod session;
pub mod store;
