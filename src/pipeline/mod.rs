pub mod normalize;
pub mod extraction;
pub mod aggregation;
pub mod document; // Per-document isolation boundary
