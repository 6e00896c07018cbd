use std::sync::Arc;

use error_stack::Report;

use crate::cache::Cache;
use crate::chart::ChartHub;
use crate::error::StorageError;
use crate::model::{Filter, Market, TriggerData, TriggerMark};
use crate::notifier::{NotificationEvent, Notifier};
use crate::store::Store;

/// Everything that happens after a filter predicate matches.
///
/// Persistence is the only hard prerequisite: cache mark, chart broadcast,
/// and notification dispatch are all best-effort and must never block or
/// fail the evaluation loop that called in here. A notification failure
/// never rolls back the already-persisted trigger row.
pub struct TriggerSink {
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    chart: Arc<ChartHub>,
    notifier: Arc<dyn Notifier>,
}

impl TriggerSink {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<Cache>,
        chart: Arc<ChartHub>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            cache,
            chart,
            notifier,
        }
    }

    /// Persist the trigger, then fan it out to the cache, the chart
    /// subscribers, and the notifier. Returns once persistence completes;
    /// the best-effort steps run synchronously after but their failures are
    /// only logged.
    pub async fn dispatch(
        &self,
        filter: &Filter,
        symbol: &str,
        market: Market,
        data: TriggerData,
    ) -> Result<(), Report<StorageError>> {
        let trigger = self
            .store
            .save_trigger(filter.id, &filter.name, symbol, market, &data)
            .await?;

        self.cache.add_trigger_mark(
            symbol,
            market,
            TriggerMark {
                timestamp: trigger.triggered_at,
                filter_id: trigger.filter_id,
                filter_name: trigger.filter_name.clone(),
                filter_type: filter.config.type_name(),
            },
        );

        self.chart.broadcast_trigger_mark(
            symbol,
            market,
            TriggerMark {
                timestamp: trigger.triggered_at,
                filter_id: trigger.filter_id,
                filter_name: trigger.filter_name.clone(),
                filter_type: filter.config.type_name(),
            },
        );

        let event = NotificationEvent {
            filter_id: trigger.filter_id,
            filter_name: trigger.filter_name.clone(),
            filter_type: filter.config.type_name(),
            symbol: symbol.to_owned(),
            market,
            triggered_at: trigger.triggered_at,
            data: trigger.data.clone(),
        };

        match self.notifier.notify(&event).await {
            Ok(()) => {
                if let Err(err) = self.store.mark_trigger_notified(trigger.id).await {
                    tracing::warn!(error = ?err, trigger_id = trigger.id, "failed to mark trigger notified");
                }
            }
            Err(err) => {
                tracing::warn!(error = ?err, trigger_id = trigger.id, "notification dispatch failed");
            }
        }

        Ok(())
    }
}
