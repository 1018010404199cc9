mod block_source;
mod handler;
mod repository;

pub use block_source::*;
pub use handler::*;
pub use repository::*;
