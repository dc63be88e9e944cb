//! Concrete protocol steps, grouped by the side that runs them

pub mod buyer;
pub mod offerer;
pub mod seller;
pub mod shared;
pub mod taker;
