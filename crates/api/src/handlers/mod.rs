//! Business logic behind the HTTP endpoints

pub mod orders;
