mod other;
mod setup;

pub use other::*;
pub use setup::*;
