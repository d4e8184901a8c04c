//! In-process daily trigger for the dispatch job.

pub mod cron;
pub mod engine;

pub use self::cron::DailyTrigger;
pub use self::engine::run_scheduler_loop;
