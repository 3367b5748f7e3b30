//! Storage ports implemented by `odp_storage` and by test doubles.

mod traits;

pub use traits::*;
