//! Test utilities and mock infrastructure.

pub mod recording;
pub mod test_helpers;

pub use async_test::*;
pub use mock_backend::*;
pub use recording::*;
pub use test_helpers::*;
