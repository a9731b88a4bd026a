pub mod factors;
pub mod optimize;
pub mod pipeline;
pub mod risk;
