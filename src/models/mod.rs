pub mod job;
pub mod notification;
pub mod usage;
pub mod user;

pub use job::*;
pub use notification::*;
pub use usage::*;
pub use user::*;
