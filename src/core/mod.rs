mod cache;
mod differ;
mod engine;
mod hasher;
mod pages;
mod pixels;
mod rasterizer;
mod results;
mod store;

#[cfg(test)]
mod testing;

pub use differ::HighlightColor;
pub use hasher::ComparisonId;
pub use results::JobStatus;

// Export the main engine
pub use engine::{CompareReport, Engine};
