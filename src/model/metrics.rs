//! KPIs recomputed from the `RAW_ORDERS` rows and the manual overrides, stored in the `METRICS`
//! tab as `key, label, value` rows.

use crate::model::{Amount, ManualOverride, OrderRow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const METRICS_TAB: &str = "METRICS";
pub const METRICS_HEADERS: [&str; 3] = ["key", "label", "value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    TotalRevenue,
    TotalUnits,
    TotalCogs,
    TotalShippingLabelCost,
    GrossProfit,
    ContributionProfit,
    SetupCosts,
    NetProfitAfterSetup,
    UnfulfilledCount,
    MissingLabelCostCount,
}

serde_plain::derive_display_from_serialize!(MetricKey);
serde_plain::derive_fromstr_from_deserialize!(MetricKey);

impl MetricKey {
    pub const ALL: [MetricKey; 10] = [
        MetricKey::TotalRevenue,
        MetricKey::TotalUnits,
        MetricKey::TotalCogs,
        MetricKey::TotalShippingLabelCost,
        MetricKey::GrossProfit,
        MetricKey::ContributionProfit,
        MetricKey::SetupCosts,
        MetricKey::NetProfitAfterSetup,
        MetricKey::UnfulfilledCount,
        MetricKey::MissingLabelCostCount,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MetricKey::TotalRevenue => "Total Revenue",
            MetricKey::TotalUnits => "Total Units Sold",
            MetricKey::TotalCogs => "Total COGS",
            MetricKey::TotalShippingLabelCost => "Total Shipping Label Cost",
            MetricKey::GrossProfit => "Gross Profit",
            MetricKey::ContributionProfit => "Contribution Profit",
            MetricKey::SetupCosts => "Setup Costs",
            MetricKey::NetProfitAfterSetup => "Net Profit After Setup",
            MetricKey::UnfulfilledCount => "Unfulfilled Orders",
            MetricKey::MissingLabelCostCount => "Missing Label Cost",
        }
    }

    /// Counts are written as whole numbers, everything else as money.
    pub fn is_count(&self) -> bool {
        matches!(
            self,
            MetricKey::TotalUnits | MetricKey::UnfulfilledCount | MetricKey::MissingLabelCostCount
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub key: MetricKey,
    pub label: String,
    pub value: Decimal,
}

impl Metric {
    pub fn new(key: MetricKey, value: Decimal) -> Self {
        Self {
            key,
            label: key.label().to_string(),
            value,
        }
    }

    pub fn display_value(&self) -> String {
        if self.key.is_count() {
            self.value.trunc().to_string()
        } else {
            Amount::new(self.value).to_string()
        }
    }
}

/// The full metric set, in `MetricKey::ALL` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics(Vec<Metric>);

impl Metrics {
    pub fn compute(
        rows: &[OrderRow],
        overrides: &[ManualOverride],
        setup_costs: Decimal,
    ) -> Metrics {
        let total_revenue: Amount = rows.iter().map(OrderRow::revenue).sum();
        let total_units: i64 = rows.iter().map(|r| r.quantity).sum();
        let total_cogs: Amount = rows.iter().map(OrderRow::cogs).sum();
        let total_label: Amount = overrides
            .iter()
            .filter_map(|o| o.shipping_label_cost)
            .sum();
        let gross = total_revenue - total_cogs;
        let contribution = gross - total_label;
        let net = contribution.value() - setup_costs;

        let unfulfilled: BTreeSet<&str> = rows
            .iter()
            .filter(|r| r.shipping_status() == crate::model::order::UNFULFILLED)
            .map(|r| r.order_id.as_str())
            .collect();
        let with_label: HashMap<&str, bool> = overrides
            .iter()
            .map(|o| (o.order_id.as_str(), o.shipping_label_cost.is_some()))
            .collect();
        let missing: BTreeSet<&str> = rows
            .iter()
            .map(|r| r.order_id.as_str())
            .filter(|id| !with_label.get(id).copied().unwrap_or(false))
            .collect();

        Metrics(vec![
            Metric::new(MetricKey::TotalRevenue, total_revenue.round().value()),
            Metric::new(MetricKey::TotalUnits, Decimal::from(total_units)),
            Metric::new(MetricKey::TotalCogs, total_cogs.round().value()),
            Metric::new(MetricKey::TotalShippingLabelCost, total_label.round().value()),
            Metric::new(MetricKey::GrossProfit, gross.round().value()),
            Metric::new(MetricKey::ContributionProfit, contribution.round().value()),
            Metric::new(MetricKey::SetupCosts, setup_costs),
            Metric::new(MetricKey::NetProfitAfterSetup, net.round_dp(2)),
            Metric::new(MetricKey::UnfulfilledCount, Decimal::from(unfulfilled.len())),
            Metric::new(MetricKey::MissingLabelCostCount, Decimal::from(missing.len())),
        ])
    }

    /// Reads whatever metrics an existing `METRICS` tab holds. Unknown keys and unparsable values
    /// are skipped, as is the header row.
    pub fn from_values(values: &[Vec<String>]) -> Metrics {
        let metrics = values
            .iter()
            .filter_map(|row| {
                let key: MetricKey = row.first()?.trim().parse().ok()?;
                let value: Amount = row.get(2)?.parse().ok()?;
                let label = row
                    .get(1)
                    .filter(|l| !l.is_empty())
                    .cloned()
                    .unwrap_or_else(|| key.label().to_string());
                Some(Metric {
                    key,
                    label,
                    value: value.value(),
                })
            })
            .collect();
        Metrics(metrics)
    }

    pub fn get(&self, key: MetricKey) -> Option<Decimal> {
        self.0.iter().find(|m| m.key == key).map(|m| m.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Header plus one row per metric, for `METRICS!A1:C{n}`.
    pub fn to_values(&self) -> Vec<Vec<String>> {
        let mut values = vec![METRICS_HEADERS.iter().map(|h| h.to_string()).collect()];
        for m in &self.0 {
            values.push(vec![m.key.to_string(), m.label.clone(), m.value.to_string()]);
        }
        values
    }

    /// A `key → value` JSON object for command responses.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|m| {
                let value = if m.key.is_count() {
                    serde_json::json!(m.value.trunc().to_string().parse::<i64>().unwrap_or(0))
                } else {
                    serde_json::json!(Amount::new(m.value).to_f64())
                };
                (m.key.to_string(), value)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OverrideUpdate;
    use chrono::Utc;
    use std::str::FromStr;

    fn row(order_id: &str, qty: i64, price: &str, fulfillment: &str) -> OrderRow {
        OrderRow {
            order_id: order_id.to_string(),
            order_number: format!("#{order_id}"),
            quantity: qty,
            price: Amount::from_cell(price),
            unit_cost: Amount::from_cell("12.26"),
            fulfillment_status: fulfillment.to_string(),
            ..Default::default()
        }
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_compute() {
        let rows = vec![
            row("1", 2, "25.00", ""),
            row("1", 1, "20.00", ""),
            row("2", 1, "30.00", "fulfilled"),
        ];
        let overrides = vec![ManualOverride::merge(
            "2",
            None,
            OverrideUpdate::new("t").shipping_label_cost(Amount::from_cell("4.85")),
            Utc::now(),
        )];
        let metrics = Metrics::compute(&rows, &overrides, d("809.32"));
        assert_eq!(metrics.len(), MetricKey::ALL.len());
        assert_eq!(metrics.get(MetricKey::TotalRevenue), Some(d("100.00")));
        assert_eq!(metrics.get(MetricKey::TotalUnits), Some(d("4")));
        assert_eq!(metrics.get(MetricKey::TotalCogs), Some(d("49.04")));
        assert_eq!(metrics.get(MetricKey::TotalShippingLabelCost), Some(d("4.85")));
        assert_eq!(metrics.get(MetricKey::GrossProfit), Some(d("50.96")));
        assert_eq!(metrics.get(MetricKey::ContributionProfit), Some(d("46.11")));
        assert_eq!(metrics.get(MetricKey::NetProfitAfterSetup), Some(d("-763.21")));
        assert_eq!(metrics.get(MetricKey::UnfulfilledCount), Some(d("1")));
        assert_eq!(metrics.get(MetricKey::MissingLabelCostCount), Some(d("1")));
    }

    #[test]
    fn test_values_read_back() {
        let metrics = Metrics::compute(&[row("1", 1, "10", "")], &[], d("100"));
        let values = metrics.to_values();
        assert_eq!(values[0], vec!["key", "label", "value"]);
        assert_eq!(values[7][0], "setup_costs");
        let back = Metrics::from_values(&values);
        assert_eq!(back.get(MetricKey::SetupCosts), Some(d("100")));
        assert_eq!(back.len(), metrics.len());
    }

    #[test]
    fn test_from_values_skips_junk() {
        let values = vec![
            vec!["setup_costs".to_string(), "".to_string(), "$1,000.50".to_string()],
            vec!["bogus".to_string(), "x".to_string(), "1".to_string()],
            vec!["total_units".to_string()],
        ];
        let metrics = Metrics::from_values(&values);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics.get(MetricKey::SetupCosts), Some(d("1000.50")));
        assert_eq!(metrics.iter().next().unwrap().label, "Setup Costs");
    }

    #[test]
    fn test_key_strings() {
        assert_eq!(MetricKey::NetProfitAfterSetup.to_string(), "net_profit_after_setup");
        assert_eq!(
            MetricKey::from_str("missing_label_cost_count").unwrap(),
            MetricKey::MissingLabelCostCount
        );
        let m = Metric::new(MetricKey::UnfulfilledCount, d("3"));
        assert_eq!(m.display_value(), "3");
        let m = Metric::new(MetricKey::GrossProfit, d("1234.5"));
        assert_eq!(m.display_value(), "$1,234.50");
    }

    #[test]
    fn test_to_json() {
        let metrics = Metrics::compute(&[row("1", 2, "10", "")], &[], d("5"));
        let json = metrics.to_json();
        assert_eq!(json["total_units"], 2);
        assert_eq!(json["total_revenue"], 20.0);
    }
}
