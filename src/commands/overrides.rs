//! Manual overrides (label cost, PSL, notes) and the order lists built on them.

use crate::api::{ensure_tab, replace_tab, Sheet};
use crate::commands::view::build_orders_view;
use crate::commands::{read_raw_orders, resolve_order, Out, Session};
use crate::db::Db;
use crate::model::order::UNFULFILLED;
use crate::model::overrides::{MANUAL_OVERRIDES_HEADERS, MANUAL_OVERRIDES_TAB};
use crate::model::{Amount, ManualOverride, OrderRow, OverrideUpdate};
use crate::Result;
use anyhow::ensure;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::info;

/// How many orders a list message shows.
const LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub order_number: String,
    pub customer: String,
    pub date: String,
    /// Revenue for most lists, profit for the negative profit list.
    pub value: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderList {
    pub count: usize,
    pub orders: Vec<OrderSummary>,
}

/// The result of setting one label cost on several unfulfilled orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkLabelCost {
    pub shipping_label_cost: Amount,
    pub requested: usize,
    /// Order numbers, most recent first.
    pub orders: Vec<String>,
}

/// Rewrites the hidden `MANUAL_OVERRIDES` tab from the database.
pub(crate) async fn publish_overrides(sheet: &mut dyn Sheet, db: &Db) -> Result<()> {
    let overrides = db.overrides().await?;
    ensure_tab(sheet, MANUAL_OVERRIDES_TAB, true).await?;
    let mut values: Vec<Vec<String>> =
        vec![MANUAL_OVERRIDES_HEADERS.iter().map(|h| h.to_string()).collect()];
    values.extend(overrides.iter().map(ManualOverride::sheet_values));
    replace_tab(sheet, MANUAL_OVERRIDES_TAB, values).await?;
    info!("Published {} manual overrides", overrides.len());
    Ok(())
}

/// Resolves `order_ref`, applies `update`, then republishes the overrides tab and the view.
async fn apply(
    session: &mut Session,
    order_ref: &str,
    update: OverrideUpdate,
) -> Result<ManualOverride> {
    let db = session.config().db().clone();
    let sheet = session.sheet().await?;
    let rows = read_raw_orders(sheet).await?;
    let (order_id, order_number) = resolve_order(&rows, order_ref)?;
    let stored = db
        .upsert_override(&order_id, update.order_number(order_number))
        .await?;
    publish_overrides(sheet, &db).await?;
    build_orders_view(sheet, &rows).await?;
    Ok(stored)
}

/// The order number and stored override for `order_ref`.
async fn lookup(
    session: &mut Session,
    order_ref: &str,
) -> Result<(String, Option<ManualOverride>)> {
    let db = session.config().db().clone();
    let rows = read_raw_orders(session.sheet().await?).await?;
    let (order_id, order_number) = resolve_order(&rows, order_ref)?;
    Ok((order_number, db.get_override(&order_id).await?))
}

pub async fn set_label_cost(
    session: &mut Session,
    order_ref: &str,
    amount: Amount,
) -> Result<Out<ManualOverride>> {
    ensure!(!amount.is_negative(), "The label cost cannot be negative");
    let update = OverrideUpdate::new(session.actor()).shipping_label_cost(amount);
    let stored = apply(session, order_ref, update).await?;
    Ok(Out::new(
        format!(
            "Set the shipping label cost for order {} to {amount}",
            stored.order_number
        ),
        stored,
    ))
}

pub async fn set_psl(
    session: &mut Session,
    order_ref: &str,
    value: &str,
) -> Result<Out<ManualOverride>> {
    let update = OverrideUpdate::new(session.actor()).psl(value.trim());
    let stored = apply(session, order_ref, update).await?;
    Ok(Out::new(
        format!("Set the PSL for order {} to {}", stored.order_number, value.trim()),
        stored,
    ))
}

/// Sets `amount` as the label cost of the `count` most recent unfulfilled orders. Fewer are
/// updated when fewer are unfulfilled.
pub async fn set_label_cost_for_unfulfilled(
    session: &mut Session,
    amount: Amount,
    count: usize,
) -> Result<Out<BulkLabelCost>> {
    ensure!(!amount.is_negative(), "The label cost cannot be negative");
    ensure!(count > 0, "The number of orders must be at least 1");
    let actor = session.actor().to_string();
    let db = session.config().db().clone();
    let sheet = session.sheet().await?;
    let rows = read_raw_orders(sheet).await?;
    let mut unfulfilled: Vec<Vec<&OrderRow>> = group_by_order(&rows)
        .into_iter()
        .filter(|lines| lines[0].shipping_status() == UNFULFILLED)
        .collect();
    ensure!(!unfulfilled.is_empty(), "No unfulfilled orders found");
    unfulfilled.sort_by_key(|lines| {
        Reverse(DateTime::parse_from_rfc3339(&lines[0].created_at).ok())
    });

    let mut orders = Vec::new();
    for lines in unfulfilled.iter().take(count) {
        let first = lines[0];
        let update = OverrideUpdate::new(actor.as_str())
            .shipping_label_cost(amount)
            .order_number(first.order_number.as_str());
        db.upsert_override(&first.order_id, update).await?;
        orders.push(first.order_number.clone());
    }
    publish_overrides(sheet, &db).await?;
    build_orders_view(sheet, &rows).await?;
    info!("Set label cost {amount} on {} unfulfilled orders", orders.len());

    Ok(Out::new(
        format!(
            "Set the shipping label cost to {amount} for {} unfulfilled orders: {}",
            orders.len(),
            orders.join(", ")
        ),
        BulkLabelCost {
            shipping_label_cost: amount,
            requested: count,
            orders,
        },
    ))
}

pub async fn get_psl(
    session: &mut Session,
    order_ref: &str,
) -> Result<Out<Option<ManualOverride>>> {
    let (order_number, stored) = lookup(session, order_ref).await?;
    let message = match stored.as_ref().and_then(|o| o.psl.as_deref()) {
        Some(psl) if !psl.trim().is_empty() => format!("PSL for order {order_number}: {psl}"),
        _ => format!("Order {order_number} has no PSL set yet"),
    };
    Ok(Out::new(message, stored))
}

pub async fn get_notes(
    session: &mut Session,
    order_ref: &str,
) -> Result<Out<Option<ManualOverride>>> {
    let (order_number, stored) = lookup(session, order_ref).await?;
    let message = match stored.as_ref().and_then(|o| o.notes.as_deref()) {
        Some(notes) if !notes.trim().is_empty() => {
            format!("Notes for order {order_number}:\n{notes}")
        }
        _ => format!("Order {order_number} has no notes yet"),
    };
    Ok(Out::new(message, stored))
}

/// Appends `text` to the order's notes.
pub async fn add_note(
    session: &mut Session,
    order_ref: &str,
    text: &str,
) -> Result<Out<ManualOverride>> {
    ensure!(!text.trim().is_empty(), "The note is empty");
    let update = OverrideUpdate::new(session.actor()).note(text.trim());
    let stored = apply(session, order_ref, update).await?;
    Ok(Out::new(
        format!("Added a note to order {}", stored.order_number),
        stored,
    ))
}

/// Distinct orders whose shipping status is Unfulfilled.
pub async fn show_unfulfilled(session: &mut Session) -> Result<Out<OrderList>> {
    let rows = read_raw_orders(session.sheet().await?).await?;
    let list = order_list(
        group_by_order(&rows)
            .into_iter()
            .filter(|lines| lines[0].shipping_status() == UNFULFILLED)
            .map(|lines| summary(&lines, lines.iter().map(|r| r.revenue()).sum()))
            .collect(),
    );
    Ok(Out::new(
        list_message(&list, "unfulfilled orders", "All orders are fulfilled"),
        list,
    ))
}

/// Orders where price × quantity + shipping − unit cost × quantity − label cost is below zero.
pub async fn show_negative_profit(session: &mut Session) -> Result<Out<OrderList>> {
    let db = session.config().db().clone();
    let rows = read_raw_orders(session.sheet().await?).await?;
    let overrides = db.overrides().await?;
    let labels = label_costs(&overrides);
    let list = order_list(
        group_by_order(&rows)
            .into_iter()
            .filter_map(|lines| {
                let id = lines[0].order_id.as_str();
                let profit = order_profit(&lines, labels.get(id).copied().unwrap_or_default());
                profit.is_negative().then(|| summary(&lines, profit))
            })
            .collect(),
    );
    Ok(Out::new(
        list_message(&list, "orders with negative profit", "No orders have negative profit"),
        list,
    ))
}

/// Distinct orders with no label cost override.
pub async fn show_missing_label_cost(session: &mut Session) -> Result<Out<OrderList>> {
    let db = session.config().db().clone();
    let rows = read_raw_orders(session.sheet().await?).await?;
    let overrides = db.overrides().await?;
    let labels = label_costs(&overrides);
    let list = order_list(
        group_by_order(&rows)
            .into_iter()
            .filter(|lines| !labels.contains_key(lines[0].order_id.as_str()))
            .map(|lines| summary(&lines, lines.iter().map(|r| r.revenue()).sum()))
            .collect(),
    );
    Ok(Out::new(
        list_message(
            &list,
            "orders missing a label cost",
            "Every order has a label cost",
        ),
        list,
    ))
}

fn label_costs(overrides: &[ManualOverride]) -> HashMap<&str, Amount> {
    overrides
        .iter()
        .filter_map(|o| Some((o.order_id.as_str(), o.shipping_label_cost?)))
        .collect()
}

/// Line items grouped by order id, in first-seen order. Every group is non-empty.
pub(crate) fn group_by_order(rows: &[OrderRow]) -> Vec<Vec<&OrderRow>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&OrderRow>> = Vec::new();
    for row in rows {
        match index.get(row.order_id.as_str()) {
            Some(&i) => groups[i].push(row),
            None => {
                index.insert(row.order_id.as_str(), groups.len());
                groups.push(vec![row]);
            }
        }
    }
    groups
}

fn order_profit(lines: &[&OrderRow], label_cost: Amount) -> Amount {
    let mut profit = Amount::ZERO;
    for line in lines {
        profit = profit + line.revenue() + line.shipping - line.cogs();
    }
    profit - label_cost
}

fn summary(lines: &[&OrderRow], value: Amount) -> OrderSummary {
    let first = lines[0];
    OrderSummary {
        order_id: first.order_id.clone(),
        order_number: first.order_number.clone(),
        customer: first.customer.clone(),
        date: first.date(),
        value: value.round(),
    }
}

fn order_list(orders: Vec<OrderSummary>) -> OrderList {
    OrderList {
        count: orders.len(),
        orders,
    }
}

fn list_message(list: &OrderList, what: &str, none: &str) -> String {
    if list.orders.is_empty() {
        return none.to_string();
    }
    let mut message = format!("Found {} {what}:", list.count);
    for order in list.orders.iter().take(LIST_LIMIT) {
        message.push_str(&format!(
            "\n• {} {} ({}) {}",
            order.order_number, order.customer, order.date, order.value
        ));
    }
    if list.count > LIST_LIMIT {
        message.push_str(&format!("\n...and {} more", list.count - LIST_LIMIT));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TestSheet;
    use crate::test::TestEnv;

    async fn synced() -> (TestEnv, Session) {
        let env = TestEnv::new().await;
        let mut session = env.session();
        crate::commands::sync(&mut session).await.unwrap();
        (env, session)
    }

    #[tokio::test]
    async fn test_set_label_cost_and_note() {
        let (env, mut session) = synced().await;
        let out = set_label_cost(&mut session, "#1002", Amount::from_cell("4.25"))
            .await
            .unwrap();
        assert_eq!(
            out.message(),
            "Set the shipping label cost for order #1002 to $4.25"
        );
        add_note(&mut session, "1002", "reprinted").await.unwrap();
        let out = add_note(&mut session, "5002", "left at door").await.unwrap();
        let stored = out.structure().unwrap();
        assert_eq!(stored.notes.as_deref(), Some("reprinted\nleft at door"));
        assert_eq!(stored.shipping_label_cost, Some(Amount::from_cell("4.25")));
        assert_eq!(stored.updated_by, "test");

        let tab = TestSheet::cells(env.spreadsheet_id(), MANUAL_OVERRIDES_TAB);
        assert_eq!(tab[0][0], "order_id");
        assert_eq!(tab[1][0], "5002");
        assert_eq!(tab[1][2], "4.25");
        let tabs = TestSheet::state(env.spreadsheet_id()).tabs;
        assert!(tabs.iter().any(|t| t.title == MANUAL_OVERRIDES_TAB && t.hidden));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (_env, mut session) = synced().await;
        let err = set_psl(&mut session, "#1042", "3.10").await.unwrap_err();
        assert_eq!(err.to_string(), "Order 1042 not found; run a sync first");
    }

    #[tokio::test]
    async fn test_set_psl() {
        let (env, mut session) = synced().await;
        set_psl(&mut session, "1003", " 2.50 ").await.unwrap();
        let stored = env.config().db().get_override("5003").await.unwrap().unwrap();
        assert_eq!(stored.psl.as_deref(), Some("2.50"));
        assert_eq!(stored.order_number, "#1003");
    }

    #[tokio::test]
    async fn test_lists() {
        let (_env, mut session) = synced().await;

        let out = show_unfulfilled(&mut session).await.unwrap();
        let numbers: Vec<&str> = out
            .structure()
            .unwrap()
            .orders
            .iter()
            .map(|o| o.order_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["#1002", "#1004"]);
        assert!(out.message().starts_with("Found 2 unfulfilled orders:"));

        let out = show_missing_label_cost(&mut session).await.unwrap();
        assert_eq!(out.structure().unwrap().count, 4);

        // #1003: 3 × 4.00 + 1.50 - 3 × 12.26 = -23.28
        let out = show_negative_profit(&mut session).await.unwrap();
        let list = out.structure().unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.orders[0].order_number, "#1003");
        assert_eq!(list.orders[0].value, Amount::from_cell("-23.28"));

        // #1004: 25.00 + 0 - 12.26 = 12.74, a 20.00 label makes it negative.
        set_label_cost(&mut session, "1004", Amount::from_cell("20"))
            .await
            .unwrap();
        let out = show_negative_profit(&mut session).await.unwrap();
        let list = out.structure().unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.orders[1].order_number, "#1004");
        assert_eq!(list.orders[1].value, Amount::from_cell("-7.26"));

        let out = show_missing_label_cost(&mut session).await.unwrap();
        assert_eq!(out.structure().unwrap().count, 3);
    }

    #[tokio::test]
    async fn test_label_cost_for_unfulfilled() {
        let (env, mut session) = synced().await;
        let out = set_label_cost_for_unfulfilled(&mut session, Amount::from_cell("4.12"), 1)
            .await
            .unwrap();
        assert_eq!(out.structure().unwrap().orders, vec!["#1004"]);

        let out = set_label_cost_for_unfulfilled(&mut session, Amount::from_cell("4.12"), 6)
            .await
            .unwrap();
        let bulk = out.structure().unwrap();
        assert_eq!(bulk.requested, 6);
        assert_eq!(bulk.orders, vec!["#1004", "#1002"]);
        assert_eq!(
            out.message(),
            "Set the shipping label cost to $4.12 for 2 unfulfilled orders: #1004, #1002"
        );

        let db = env.config().db();
        for id in ["5002", "5004"] {
            let stored = db.get_override(id).await.unwrap().unwrap();
            assert_eq!(stored.shipping_label_cost, Some(Amount::from_cell("4.12")));
        }
        assert!(db.get_override("5001").await.unwrap().is_none());
        let tab = TestSheet::cells(env.spreadsheet_id(), MANUAL_OVERRIDES_TAB);
        assert_eq!(tab.len(), 3);

        let err = set_label_cost_for_unfulfilled(&mut session, Amount::from_cell("1"), 0)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "The number of orders must be at least 1");
    }

    #[tokio::test]
    async fn test_label_cost_for_unfulfilled_none_left() {
        let env = TestEnv::new().await;
        let mut session = env.session();
        let err = set_label_cost_for_unfulfilled(&mut session, Amount::from_cell("4.12"), 3)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No unfulfilled orders found");
    }

    #[tokio::test]
    async fn test_get_psl_and_notes() {
        let (_env, mut session) = synced().await;
        let out = get_psl(&mut session, "1003").await.unwrap();
        assert_eq!(out.message(), "Order #1003 has no PSL set yet");
        assert!(out.structure().unwrap().is_none());
        let out = get_notes(&mut session, "#1003").await.unwrap();
        assert_eq!(out.message(), "Order #1003 has no notes yet");

        set_psl(&mut session, "1003", "2.50").await.unwrap();
        let out = get_psl(&mut session, "1003").await.unwrap();
        assert_eq!(out.message(), "PSL for order #1003: 2.50");
        let out = get_notes(&mut session, "1003").await.unwrap();
        assert_eq!(out.message(), "Order #1003 has no notes yet");

        add_note(&mut session, "1003", "reprinted").await.unwrap();
        add_note(&mut session, "1003", "left at door").await.unwrap();
        let out = get_notes(&mut session, "1003").await.unwrap();
        assert_eq!(out.message(), "Notes for order #1003:\nreprinted\nleft at door");

        let err = get_psl(&mut session, "1042").await.unwrap_err();
        assert_eq!(err.to_string(), "Order 1042 not found; run a sync first");
    }

    #[test]
    fn test_list_message_truncates() {
        let orders: Vec<OrderSummary> = (0..12)
            .map(|i| OrderSummary {
                order_id: i.to_string(),
                order_number: format!("#{i}"),
                customer: "C".into(),
                date: "2024-01-01".into(),
                value: Amount::ZERO,
            })
            .collect();
        let message = list_message(&order_list(orders), "things", "none");
        assert!(message.starts_with("Found 12 things:"));
        assert!(message.ends_with("...and 2 more"));
        assert_eq!(list_message(&OrderList::default(), "things", "none"), "none");
    }
}
