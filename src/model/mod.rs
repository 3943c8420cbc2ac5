//! Types that represent the core data model: Shopify orders and the rows they become, the PSL
//! column, manual overrides and metrics.
mod amount;
pub mod metrics;
pub mod order;
pub mod overrides;
pub mod psl;
mod row_col;

pub use amount::{Amount, AmountError};
pub use metrics::{Metric, MetricKey, Metrics};
pub use order::{OrderRow, ShopOrder, ShopProduct};
pub use overrides::{ManualOverride, OverrideUpdate};
pub use psl::{PslBackup, PslValues};
pub use row_col::{column_index, column_letter, A1Range, RowCol};
