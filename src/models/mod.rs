pub mod enums;
pub mod extraction;
pub mod product;
pub mod result;

pub use enums::*;
pub use extraction::*;
pub use product::*;
pub use result::*;
