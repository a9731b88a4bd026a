pub mod error;
pub mod linalg;
pub mod types;
pub mod universe;

#[cfg(feature = "factors")]
pub mod factor_engine;

#[cfg(feature = "risk")]
pub mod risk_estimator;

#[cfg(feature = "optimizer")]
pub mod portfolio_optimizer;

#[cfg(feature = "pipeline")]
pub mod pipeline;

pub use error::PortfolioError;
pub use types::*;

/// Standard result type for all portfolio operations
pub type PortfolioResult<T> = Result<T, PortfolioError>;
