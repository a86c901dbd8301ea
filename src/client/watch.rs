//! Watch dispatch
//!
//! One background task per open watch, forwarding events to the caller's
//! handler until the caller cancels, the client stops, or the backend closes
//! the stream.

use tokio_util::sync::CancellationToken;

use crate::backend::ResourceWatch;
use crate::resource::{Resource, WatchEventType};

/// Forward events from `watch` to `handler`
pub(crate) async fn dispatch<H>(
    mut watch: ResourceWatch,
    scope: String,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    handler: H,
) where
    H: Fn(WatchEventType, &Resource) + Send + Sync + 'static,
{
    tracing::debug!("Watch on {} started", scope);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                watch.stop();
                tracing::debug!("Watch on {} cancelled", scope);
                break;
            }
            _ = shutdown.cancelled() => {
                watch.stop();
                tracing::debug!("Watch on {} stopped by client shutdown", scope);
                break;
            }
            event = watch.next() => {
                match event {
                    Some(event) => handler(event.event_type, &event.object),
                    None => {
                        tracing::warn!("Watch on {} closed by backend", scope);
                        break;
                    }
                }
            }
        }
    }
}
