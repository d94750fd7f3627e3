//! Operation context and cancellation.
//!
//! - [`Cx`]: the context handed to scoped operations (target scope + token)
//! - [`CancelToken`]: cooperative cancellation with nested masking

pub mod cx;
pub mod token;

pub use cx::Cx;
pub use token::CancelToken;
