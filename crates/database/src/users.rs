// database/users.rs - agents and admins

pub mod model;
pub mod query;
