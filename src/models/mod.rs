pub mod file;
pub mod file_type;
pub mod identity;

pub use file::*;
pub use file_type::*;
pub use identity::*;
