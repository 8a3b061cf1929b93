mod codec;
mod error;
mod reply;
mod request;

pub use codec::*;
pub use error::*;
pub use reply::*;
pub use request::*;
