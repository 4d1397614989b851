mod audit;
mod instance;
mod learning;
mod message;
mod protocol;
mod survey;

pub use audit::*;
pub use instance::*;
pub use learning::*;
pub use message::*;
pub use protocol::*;
pub use survey::*;
