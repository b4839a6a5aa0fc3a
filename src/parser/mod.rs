pub mod ch;
pub mod columns;
pub mod format;
pub mod helpers;
pub mod maccor;
pub mod mpr;
pub mod mpt;
pub mod stream;

pub use columns::*;
pub use format::*;
pub use stream::*;
