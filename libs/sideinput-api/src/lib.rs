mod consumer;
mod error;
mod ffi;
mod generator;
mod key;
mod record;
mod store;
mod util;

pub use consumer::*;
pub use error::*;
pub use ffi::*;
pub use generator::*;
pub use key::*;
pub use record::*;
pub use store::*;
pub use util::*;
