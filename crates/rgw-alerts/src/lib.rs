//! Alert rules and their fan-out.
//!
//! [`AlertStore`] owns the cached rule listing and all rule CRUD (with plan
//! quota enforcement); [`fan_out`] is the transactional half invoked by the
//! ingestion engine for every inserted or content-changed record.

mod fanout;
mod store;

pub use fanout::{fan_out, AlertAction, FanOut};
pub use store::{plan_limit, AlertRule, AlertStore, CreatedRule, NewAlertRule, RuleStats};
