//! Static action -> reply type table and per-action timeout classes.
//!
//! The backend does not echo any request identifier, so a reply is matched to
//! its command by the reply's `type` tag alone. Actions missing from the table
//! are answered with `"{action}_response"`.

use std::borrow::Cow;

const REPLY_TYPES: &[(&str, &str)] = &[
    // Account
    ("get_portfolio", "portfolio_data"),
    ("get_mt5_symbols", "mt5_symbols"),
    // Strategies
    ("parse_strategy", "strategy_parsed"),
    ("run_backtest", "backtest_result"),
    ("save_strategy", "strategy_saved"),
    ("get_strategies", "strategies_list"),
    ("list_strategies", "strategies_list"),
    ("delete_strategy", "strategy_deleted"),
    // Templates
    ("get_templates", "templates_list"),
    ("load_template", "template_loaded"),
    // Journal
    ("get_journal_data", "journal_data"),
    ("get_journal_analytics", "journal_analytics"),
    ("save_trade_note", "note_saved"),
    // Analysis
    ("mtf_analysis", "mtf_analysis_result"),
    ("get_recovery_plan", "recovery_plan"),
    // Notifications
    ("set_telegram_settings", "telegram_settings_saved"),
    // Live trading
    ("start_live_trader", "live_trader_started"),
    ("stop_live_trader", "live_trader_stopped"),
    ("get_live_trader_status", "live_trader_status"),
    ("execute_trade", "trade_executed"),
];

const LONG_RUNNING_ACTIONS: &[&str] = &[
    "run_backtest",
    "evolve_strategy",
    "run_global_scan",
    "get_market_analysis",
    "mtf_analysis",
    "parse_strategy",
];

/// Reply type the backend uses to answer `action`.
pub fn expected_reply_type(action: &str) -> Cow<'static, str> {
    REPLY_TYPES
        .iter()
        .find(|(known, _)| *known == action)
        .map(|(_, reply)| Cow::Borrowed(*reply))
        .unwrap_or_else(|| Cow::Owned(format!("{action}_response")))
}

/// Default timeout bucket for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutClass {
    /// Most request/response actions
    Standard,
    /// Backtests, scans and other analytical jobs
    Long,
}

pub fn timeout_class(action: &str) -> TimeoutClass {
    if LONG_RUNNING_ACTIONS.contains(&action) {
        TimeoutClass::Long
    } else {
        TimeoutClass::Standard
    }
}
