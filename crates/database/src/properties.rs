// database/properties.rs - the property listings collection

pub mod maintenance;
pub mod model;
pub mod query;
pub mod views;
