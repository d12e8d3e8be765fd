mod constants;
mod packet;
mod scene;
mod timeline;

pub mod util;

pub use constants::*;
pub use packet::*;
pub use scene::*;
pub use timeline::*;
pub use util::{Clock, ManualClock, SystemClock};

/// Identity the server hands out to each connection, unique within one server lifetime.
pub type ClientId = u32;
