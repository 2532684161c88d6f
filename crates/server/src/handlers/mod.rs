//! HTTP request handlers.

pub mod form;
pub mod health;
pub mod imports;
pub mod uploads;

pub use health::*;
pub use imports::*;
pub use uploads::*;
