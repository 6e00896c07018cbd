pub mod log;
pub mod telegram;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::{Market, TriggerData};

/// Payload handed to a notifier on a confirmed filter match. Mirrors the
/// external notification event shape: everything needed to format a human
/// message without a second round trip to the store.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub filter_id: i64,
    pub filter_name: String,
    pub filter_type: &'static str,
    pub symbol: String,
    pub market: Market,
    pub triggered_at: i64,
    pub data: TriggerData,
}

/// Sink for dispatching a confirmed trigger to an external channel.
///
/// Uses `BoxFuture` instead of `async fn` in trait so the trait stays
/// object-safe (`dyn Notifier`), matching [`crate::exchange::Exchange`] and
/// [`crate::store::Store`].
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &NotificationEvent) -> BoxFuture<'_, Result<(), Report<NotifyError>>>;
}

/// Fans one notification out to every configured channel. A channel's
/// failure is logged but never fails the others; the composite only errs if
/// every channel failed, since `log::LogNotifier` alone should never fail.
pub struct CompositeNotifier {
    channels: Vec<Box<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }
}

impl Notifier for CompositeNotifier {
    fn notify(&self, event: &NotificationEvent) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            let mut last_error = None;
            let mut any_succeeded = false;

            for channel in &self.channels {
                match channel.notify(event).await {
                    Ok(()) => any_succeeded = true,
                    Err(err) => {
                        tracing::warn!(error = ?err, "notification channel failed");
                        last_error = Some(err);
                    }
                }
            }

            if any_succeeded {
                Ok(())
            } else {
                Err(last_error.unwrap_or_else(|| Report::new(NotifyError::NotConfigured)))
            }
        })
    }
}
