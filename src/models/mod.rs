pub mod enums;
pub mod envelope;
pub mod parameter;

pub use enums::*;
pub use envelope::*;
pub use parameter::*;
