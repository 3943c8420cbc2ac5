//! Turns a free-text command into an `Intent` and runs the handler for it.
//!
//! Classification is a walk down `RULES`, an ordered table: the first rule whose keywords are all
//! present wins, so the specific intents (PSL, overrides, formula fixes) sit above the generic
//! keywords like `order` or `profit`.

use crate::commands::{self, DateRange, Out, Session};
use crate::model::Amount;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BackupPsl,
    RestorePsl,
    MigratePsl,
    SetLabelCostBulk,
    SetLabelCost,
    ShowMissingLabelCost,
    SetPsl,
    AddNote,
    GetPsl,
    GetNotes,
    RevertChange,
    FixNetProfit,
    FixProfitPerShirt,
    SetSetupCosts,
    RecomputeMetrics,
    SyncOrders,
    FormatSheet,
    ShowUnfulfilled,
    ShowNegativeProfit,
    TopProducts,
    TopCustomers,
    RevenueTrends,
    LowStock,
    OrdersByDateRange,
    Revenue,
    OrdersSummary,
    ProductSales,
    ProfitBreakdown,
    Help,
}

serde_plain::derive_display_from_serialize!(Intent);
serde_plain::derive_fromstr_from_deserialize!(Intent);

/// One row of the intent table. Every group in `all` needs at least one of its keywords, none of
/// `none` may appear, and `number` requires a digit somewhere in the text.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub intent: Intent,
    pub all: &'static [&'static [&'static str]],
    pub none: &'static [&'static str],
    pub number: bool,
}

const fn rule(intent: Intent, all: &'static [&'static [&'static str]]) -> Rule {
    Rule {
        intent,
        all,
        none: &[],
        number: false,
    }
}

/// The intent table, most specific first. `Help` is the fallback and has no row.
pub const RULES: &[Rule] = &[
    rule(Intent::BackupPsl, &[&["backup"], &["psl"]]),
    rule(Intent::RestorePsl, &[&["restore"], &["psl"]]),
    rule(Intent::MigratePsl, &[&["migrate"], &["psl"]]),
    Rule {
        intent: Intent::SetLabelCostBulk,
        all: &[&["label cost"], &["last"], &["unfulfilled"]],
        none: &["show", "list", "missing"],
        number: true,
    },
    Rule {
        intent: Intent::SetLabelCost,
        all: &[&["label cost"], &["set", "to"]],
        none: &["show", "list", "missing"],
        number: false,
    },
    rule(
        Intent::ShowMissingLabelCost,
        &[&["label cost"], &["show", "list", "missing"]],
    ),
    rule(Intent::SetPsl, &[&["psl"], &["set", "update"]]),
    rule(Intent::AddNote, &[&["note"], &["add", "set"]]),
    rule(Intent::GetPsl, &[&["psl"]]),
    rule(Intent::GetNotes, &[&["note"]]),
    rule(Intent::RevertChange, &[&["revert", "undo"]]),
    Rule {
        intent: Intent::FixNetProfit,
        all: &[&["net profit", "netprofit", "profit formula", "fix profit"]],
        none: &["per shirt"],
        number: false,
    },
    rule(Intent::FixProfitPerShirt, &[&["profit per shirt"], &["fix"]]),
    Rule {
        intent: Intent::SetSetupCosts,
        all: &[&["total costs", "setup costs"], &["update", "set"]],
        none: &[],
        number: true,
    },
    rule(
        Intent::RecomputeMetrics,
        &[&["metric"], &["recompute", "recalculate", "refresh", "update"]],
    ),
    rule(
        Intent::SyncOrders,
        &[&["sync", "update", "refresh", "pull"], &["order", "sheet"]],
    ),
    rule(
        Intent::FormatSheet,
        &[&["format", "style", "color", "border", "align", "wider"]],
    ),
    rule(Intent::ShowUnfulfilled, &[&["unfulfilled", "not fulfilled"]]),
    rule(
        Intent::ShowNegativeProfit,
        &[&["negative profit", "losing money", "unprofitable"]],
    ),
    rule(
        Intent::TopProducts,
        &[&["top product", "best selling", "best seller"]],
    ),
    rule(
        Intent::TopCustomers,
        &[&["top customer", "best customer", "biggest customer"]],
    ),
    rule(
        Intent::RevenueTrends,
        &[&["trend", "over time", "daily", "weekly", "monthly"]],
    ),
    rule(Intent::LowStock, &[&["low stock", "out of stock", "inventory"]]),
    rule(
        Intent::OrdersByDateRange,
        &[&["last week", "this week", "last month", "this month", "yesterday", "today"]],
    ),
    rule(Intent::Revenue, &[&["revenue", "sales", "total", "money"]]),
    rule(Intent::OrdersSummary, &[&["order", "summary", "list"]]),
    rule(Intent::ProductSales, &[&["product", "item", "sold"]]),
    rule(Intent::ProfitBreakdown, &[&["profit", "margin", "cost"]]),
];

impl Rule {
    fn matches(&self, text: &str) -> bool {
        self.all
            .iter()
            .all(|group| group.iter().any(|k| text.contains(k)))
            && !self.none.iter().any(|k| text.contains(k))
            && (!self.number || text.chars().any(|c| c.is_ascii_digit()))
    }
}

impl Intent {
    /// The first matching rule's intent, or `Help`.
    pub fn classify(text: &str) -> Intent {
        let text = text.trim().to_lowercase();
        RULES
            .iter()
            .find(|r| r.matches(&text))
            .map(|r| r.intent)
            .unwrap_or(Intent::Help)
    }
}

pub const HELP: &str = "I can help you with:
- Syncing orders: 'sync orders' or 'update orders'
- Revenue info: 'show revenue' or 'total sales'
- Orders summary: 'list orders' or 'orders summary'
- Product sales: 'product sales' or 'items sold'
- Profit breakdown: 'show profit' or 'profit breakdown'
- Top products: 'top products' or 'best selling'
- Top customers: 'top customers' or 'best customers'
- Revenue trends: 'revenue trends' or 'daily sales'
- Low stock: 'low stock alert' or 'inventory'
- Date range: 'orders from last week' or 'this month'
- Format sheet: 'format orders sheet' or 'style sheet'
- PSL: 'backup PSL', 'restore PSL', 'migrate PSL', 'set PSL for order 1042 to 3.10'
- Label cost: 'set label cost for order 1042 to 4.85' or 'show missing label cost'
- Bulk label cost: 'set label cost to 4.12 for the last 6 unfulfilled orders'
- Lookups: 'show PSL for order 1042' or 'show notes for order 1042'
- Notes: 'add note \"reprinted\" to order 1042'
- Order checks: 'show unfulfilled orders' or 'show negative profit'
- Formulas: 'fix net profit', 'fix profit per shirt' or 'revert last change'
- Setup costs: 'update total costs to 1000'
- Metrics: 'recompute metrics'";

/// The JSON envelope returned for every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
    /// The command as received.
    pub command: String,
}

impl CommandResponse {
    pub fn failure(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
            command: command.into(),
        }
    }
}

/// Owns the `Session` that every routed command runs against.
pub struct Router {
    session: Session,
}

impl Router {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Classifies `text` and runs the handler. Handler errors come back as `success: false` with
    /// `Error: <cause>`.
    pub async fn handle(&mut self, text: &str) -> CommandResponse {
        let intent = Intent::classify(text);
        info!("Routing '{}' to {intent}", text.trim());
        if intent == Intent::Help {
            return CommandResponse::failure(text, format!("{HELP}\n\nYour command: '{text}'"));
        }
        match self.dispatch(intent, text).await {
            Ok((message, data)) => CommandResponse {
                success: true,
                message,
                data,
                command: text.to_string(),
            },
            Err(e) => {
                error!("{intent} failed: {e:#}");
                CommandResponse::failure(text, format!("Error: {e}"))
            }
        }
    }

    async fn dispatch(&mut self, intent: Intent, text: &str) -> Result<(String, Value)> {
        let s = &mut self.session;
        match intent {
            Intent::BackupPsl => parts(commands::backup_psl(s).await?),
            Intent::RestorePsl => parts(commands::restore_psl(s).await?),
            Intent::MigratePsl => parts(commands::migrate_psl(s).await?),
            Intent::SetLabelCostBulk => {
                let amount = amount_after_to(text).context(SET_LABEL_COST_BULK_USAGE)?;
                let count = count_after_last(text).context(SET_LABEL_COST_BULK_USAGE)?;
                parts(commands::set_label_cost_for_unfulfilled(s, amount, count).await?)
            }
            Intent::SetLabelCost => {
                let order = order_ref(text).context(SET_LABEL_COST_USAGE)?;
                let amount = amount_after_to(text).context(SET_LABEL_COST_USAGE)?;
                parts(commands::set_label_cost(s, &order, amount).await?)
            }
            Intent::ShowMissingLabelCost => parts(commands::show_missing_label_cost(s).await?),
            Intent::SetPsl => {
                let order = order_ref(text).context(SET_PSL_USAGE)?;
                let value = psl_value(text).context(SET_PSL_USAGE)?;
                parts(commands::set_psl(s, &order, &value).await?)
            }
            Intent::AddNote => {
                let order = order_ref(text).context(ADD_NOTE_USAGE)?;
                let note = note_text(text).context(ADD_NOTE_USAGE)?;
                parts(commands::add_note(s, &order, &note).await?)
            }
            Intent::GetPsl => {
                let order = order_ref(text).context(GET_PSL_USAGE)?;
                parts(commands::get_psl(s, &order).await?)
            }
            Intent::GetNotes => {
                let order = order_ref(text).context(GET_NOTES_USAGE)?;
                parts(commands::get_notes(s, &order).await?)
            }
            Intent::RevertChange => parts(commands::revert_last_change(s).await?),
            Intent::FixNetProfit => parts(commands::fix_net_profit(s).await?),
            Intent::FixProfitPerShirt => parts(commands::fix_profit_per_shirt(s).await?),
            Intent::SetSetupCosts => {
                let amount = amount_after_to(text)
                    .or_else(|| last_amount(text))
                    .context(SET_SETUP_COSTS_USAGE)?;
                parts(commands::set_setup_costs(s, amount).await?)
            }
            Intent::RecomputeMetrics => {
                let out = commands::recompute_metrics(s).await?;
                let data = out.structure().map(|m| m.to_json()).unwrap_or(Value::Null);
                Ok((out.message().to_string(), data))
            }
            Intent::SyncOrders => parts(commands::sync(s).await?),
            Intent::FormatSheet => parts(commands::format_sheet(s).await?),
            Intent::ShowUnfulfilled => parts(commands::show_unfulfilled(s).await?),
            Intent::ShowNegativeProfit => parts(commands::show_negative_profit(s).await?),
            Intent::TopProducts => parts(commands::top_products(s).await?),
            Intent::TopCustomers => parts(commands::top_customers(s).await?),
            Intent::RevenueTrends => parts(commands::revenue_trends(s).await?),
            Intent::LowStock => parts(commands::low_stock(s).await?),
            Intent::OrdersByDateRange => {
                let range = DateRange::from_text(text).unwrap_or(DateRange::LastWeek);
                parts(commands::orders_by_date_range(s, range).await?)
            }
            Intent::Revenue => parts(commands::revenue(s).await?),
            Intent::OrdersSummary => parts(commands::orders_summary(s).await?),
            Intent::ProductSales => parts(commands::product_sales(s).await?),
            Intent::ProfitBreakdown => parts(commands::profit_breakdown(s).await?),
            Intent::Help => Ok((HELP.to_string(), Value::Null)),
        }
    }
}

fn parts<T>(out: Out<T>) -> Result<(String, Value)>
where
    T: Serialize + Clone + Debug,
{
    Ok((out.message().to_string(), out.structure_json()))
}

const SET_LABEL_COST_USAGE: &str = "Usage: set label cost for order 1042 to 4.85";
const SET_LABEL_COST_BULK_USAGE: &str =
    "Usage: set label cost to 4.12 for the last 6 unfulfilled orders";
const GET_PSL_USAGE: &str = "Usage: show PSL for order 1042";
const GET_NOTES_USAGE: &str = "Usage: show notes for order 1042";
const SET_PSL_USAGE: &str = "Usage: set PSL for order 1042 to 3.10";
const ADD_NOTE_USAGE: &str = "Usage: add note \"reprinted\" to order 1042";
const SET_SETUP_COSTS_USAGE: &str = "Usage: update total costs to 1000";

/// `#1042` anywhere, or the number after `order`.
pub fn order_ref(text: &str) -> Option<String> {
    let digits = |s: &str| {
        let s = s
            .trim_start_matches('#')
            .trim_end_matches(|c: char| !c.is_ascii_digit());
        (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())).then(|| s.to_string())
    };
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if let Some(found) = tokens
        .iter()
        .filter(|t| t.starts_with('#'))
        .find_map(|t| digits(*t))
    {
        return Some(found);
    }
    tokens.windows(2).find_map(|pair| {
        let word = pair[0].to_ascii_lowercase();
        let word = word.trim_end_matches(':');
        (word == "order" || word == "orders")
            .then(|| digits(pair[1]))
            .flatten()
    })
}

/// The amount in the first token after a `to` that parses as one.
pub fn amount_after_to(text: &str) -> Option<Amount> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        if !pair[0].eq_ignore_ascii_case("to") {
            return None;
        }
        pair[1].trim_end_matches(['.', ',', '!', '?']).parse().ok()
    })
}

/// The whole number after `last`, as in `the last 6 unfulfilled orders`.
pub fn count_after_last(text: &str) -> Option<usize> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        if !pair[0].eq_ignore_ascii_case("last") {
            return None;
        }
        pair[1].trim_end_matches(['.', ',', '!', '?']).parse().ok()
    })
}

fn last_amount(text: &str) -> Option<Amount> {
    text.split_whitespace()
        .rev()
        .filter(|t| !t.starts_with('#'))
        .find_map(|t| t.trim_end_matches(['.', ',', '!', '?']).parse().ok())
}

/// The token after `to`, `=` or `is`, case preserved.
pub fn psl_value(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        let word = pair[0].to_ascii_lowercase();
        matches!(word.as_str(), "to" | "=" | "is").then(|| pair[1].to_string())
    })
}

/// Quoted text, or whatever follows `note` up to ` to order` or ` for order`.
pub fn note_text(text: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(start) = text.find(quote) {
            if let Some(len) = text[start + 1..].find(quote) {
                let quoted = text[start + 1..start + 1 + len].trim();
                if !quoted.is_empty() {
                    return Some(quoted.to_string());
                }
            }
        }
    }
    let lower = text.to_ascii_lowercase();
    let start = lower.find("note")? + "note".len();
    let end = [" to order", " for order", " on order"]
        .iter()
        .filter_map(|m| lower[start..].find(m).map(|i| start + i))
        .min()
        .unwrap_or(text.len());
    let note = text[start..end].trim().trim_start_matches(':').trim();
    (!note.is_empty()).then(|| note.to_string())
}
