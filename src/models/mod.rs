pub mod news;
pub mod source;

pub use news::*;
pub use source::*;
