pub mod margin;
pub mod table;

pub use margin::*;
pub use table::*;
