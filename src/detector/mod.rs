pub mod difference;

pub use difference::DifferenceEngine;
