mod platform;
mod retry;
mod util;

pub use platform::*;
pub use retry::*;
pub use util::*;
