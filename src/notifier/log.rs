use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::notifier::{NotificationEvent, Notifier};

/// Notifier that only logs. Always active alongside whichever external
/// channel is configured, so a trigger is observable even with Telegram
/// disabled or misconfigured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &NotificationEvent) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            tracing::warn!(
                filter_id = event.filter_id,
                filter_name = %event.filter_name,
                filter_type = event.filter_type,
                symbol = %event.symbol,
                market = %event.market,
                triggered_at = event.triggered_at,
                price_change_percent = event.data.price_change_percent,
                spike_coefficient = event.data.spike_coefficient,
                url = %event.data.url,
                "TRIGGER: {} matched {} ({})",
                event.filter_name,
                event.symbol,
                event.market,
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Market, TriggerData};

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let notifier = LogNotifier;
        let event = NotificationEvent {
            filter_id: 1,
            filter_name: "fast pump".into(),
            filter_type: "price_change",
            symbol: "BTC/USDT".into(),
            market: Market::Spot,
            triggered_at: 0,
            data: TriggerData::default(),
        };
        assert!(notifier.notify(&event).await.is_ok());
    }
}
