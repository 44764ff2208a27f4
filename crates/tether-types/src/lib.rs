mod event;
mod model;
mod session;
mod tool;

pub use event::*;
pub use model::*;
pub use session::*;
pub use tool::*;
