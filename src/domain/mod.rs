pub mod load;
pub mod state;

pub use load::*;
pub use state::*;
