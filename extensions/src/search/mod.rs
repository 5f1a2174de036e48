//! Search index implementations.

mod inverted;

pub use self::inverted::InvertedIndex;
