pub mod metadata;
pub mod module;
pub mod table;

pub use metadata::*;
pub use module::*;
pub use table::*;
