pub mod event;
pub mod period;
pub mod session;
pub mod views;

pub use event::{Direction, Event};
pub use period::Period;
pub use session::{Filter, Frame, Session, SessionsStats};
pub use views::{AllPeriods, Bucket, PeriodView, Stats, StatsAll};
