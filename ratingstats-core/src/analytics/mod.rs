//! Analytics module for ratingstats
//!
//! - [`aggregate`]: pure statistics over rating observations
//! - [`result`]: the payloads those statistics produce
//!
//! Everything here is stateless; caching and data access live in
//! [`crate::service`].

pub mod aggregate;
pub mod result;

pub use aggregate::{
    average, distribution, grouped_stats, median, mode, nps_stats, round_to, scale_metrics,
    summarize, trend, MAX_TREND_POINTS,
};
pub use result::{
    DistributionBucket, DistributionSeries, FieldStatistics, FieldSummary, GroupMetrics,
    GroupScale, GroupStats, GroupedStatistics, NpsMetrics, RatingMetrics, ScaleMetrics,
    TrendSeries,
};
