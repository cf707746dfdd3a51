pub mod file;
pub mod policy;
pub mod quota;
pub mod retry;
pub mod saga;
pub mod vault;

pub use file::VaultService;
