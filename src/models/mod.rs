pub mod actor;
pub mod bid;
pub mod location;
pub mod package;
pub mod route;
