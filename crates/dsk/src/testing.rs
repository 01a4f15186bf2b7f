//! 🧪 Test helpers that more than one module wants.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// 📡 Counts WARN events and ignores everything else.
struct WarnCounter {
    warnings: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// 🔔 Count the warnings this thread emits until the guard drops.
pub(crate) fn count_warnings() -> (DefaultGuard, Arc<AtomicUsize>) {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter {
        warnings: Arc::clone(&warnings),
    });
    (tracing::subscriber::set_default(subscriber), warnings)
}
