//! Statistical primitives used to judge remote server health over time.

pub mod average;
pub mod counter;

pub use average::{DecayParams, DiscExponentialAverage, exponential_moving_average};
pub use counter::{BasicCounter, Counter, CounterSnapshot, MAX_ACTOR_NAME_LEN};
