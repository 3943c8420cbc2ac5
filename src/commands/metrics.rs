use crate::api::{ensure_tab, Sheet, SheetRange};
use crate::commands::{read_raw_orders, Out, Session};
use crate::model::metrics::METRICS_TAB;
use crate::model::{A1Range, ManualOverride, MetricKey, Metrics, OrderRow, RowCol};
use crate::Result;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// The setup costs stored in the `METRICS` tab, or `default` when the tab or the row is missing.
pub(crate) async fn current_setup_costs(
    sheet: &mut dyn Sheet,
    default: Decimal,
) -> Result<Decimal> {
    Ok(read_metrics(sheet)
        .await?
        .get(MetricKey::SetupCosts)
        .unwrap_or(default))
}

async fn read_metrics(sheet: &mut dyn Sheet) -> Result<Metrics> {
    if !sheet.tabs().await?.iter().any(|t| t.title == METRICS_TAB) {
        return Ok(Metrics::default());
    }
    let values = sheet.get(&A1Range::tab(METRICS_TAB)).await?;
    Ok(Metrics::from_values(&values))
}

/// Computes the metric set and writes it to `METRICS!A1:C{n}`.
pub(crate) async fn write_metrics(
    sheet: &mut dyn Sheet,
    rows: &[OrderRow],
    overrides: &[ManualOverride],
    setup_costs: Decimal,
) -> Result<Metrics> {
    let metrics = Metrics::compute(rows, overrides, setup_costs);
    ensure_tab(sheet, METRICS_TAB, false).await?;
    sheet
        .write_ranges(&[SheetRange::new(
            A1Range::cell(METRICS_TAB, RowCol::new(0, 0)),
            metrics.to_values(),
        )])
        .await?;
    debug!("Wrote {} metrics", metrics.len());
    Ok(metrics)
}

/// Recomputes every metric from `RAW_ORDERS` and the manual overrides. Setup costs carry over
/// from the existing `METRICS` tab.
pub async fn recompute_metrics(session: &mut Session) -> Result<Out<Metrics>> {
    let db = session.config().db().clone();
    let default_setup = session.config().setup_costs();
    let sheet = session.sheet().await?;
    let rows = read_raw_orders(sheet).await?;
    let overrides = db.overrides().await?;
    let setup_costs = current_setup_costs(sheet, default_setup).await?;
    let metrics = write_metrics(sheet, &rows, &overrides, setup_costs).await?;
    info!("Recomputed metrics from {} order rows", rows.len());

    let mut message = String::from("Metrics recomputed:");
    for metric in metrics.iter() {
        message.push_str(&format!("\n• {}: {}", metric.label, metric.display_value()));
    }
    Ok(Out::new(message, metrics))
}
