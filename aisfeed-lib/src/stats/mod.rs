//! Rolling traffic statistics.
mod summary;
mod traffic;
mod window;

pub use summary::*;
pub use traffic::*;
pub use window::*;
