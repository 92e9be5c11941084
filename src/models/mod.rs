pub mod files;
pub mod requests;

pub use files::*;
pub use requests::*;
