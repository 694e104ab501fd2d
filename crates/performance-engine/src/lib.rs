pub mod engine;
pub mod equity;
pub mod resolver;
pub mod shared_math;

pub use engine::PerformanceEngine;
pub use equity::{EquityCalculator, EquityCurve, EquityMetrics};
pub use resolver::{CompositionResolver, Resolution};
