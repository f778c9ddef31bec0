//! Daily check-in/check-out protocol and the views derived from it.

pub mod clock;
pub mod context;
pub mod engine;
pub mod error;
pub mod live;
pub mod metrics;
pub mod retry;

pub use clock::{Clock, SystemClock};
pub use context::CallerContext;
pub use engine::AttendanceService;
pub use error::AttendanceError;
pub use live::{LiveView, SubscriptionHandle, TodaySubscription};
pub use retry::RetryPolicy;
