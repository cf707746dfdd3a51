pub mod admin;
pub mod file;
