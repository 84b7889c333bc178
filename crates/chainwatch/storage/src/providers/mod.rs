//! Transaction-scoped providers over the chainwatch tables.
//!
//! - tracked heads and the number index behind them (via [`HeadProvider`])
//! - pending logs and their broadcast records (via [`LogProvider`])
mod head_provider;
pub(crate) use head_provider::HeadProvider;

mod log_provider;
pub(crate) use log_provider::LogProvider;
