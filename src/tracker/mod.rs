pub mod events;
pub mod suspensions;
pub mod tokens;
pub mod types;

pub use self::events::EventTracker;
pub use self::suspensions::SuspensionTracker;
pub use self::tokens::TokenTracker;
pub use self::types::{EventKind, WebsiteEvent};

use tracing::{error, warn};

/// Initial-load policy shared by the trackers: one retry, then start
/// empty rather than wedging every queued caller behind a dead store.
pub(crate) async fn load_or_default<T, F, Fut>(what: &str, op: F) -> T
where
    T: Default,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    match op().await {
        Ok(v) => v,
        Err(first) => {
            warn!("Initial {} load failed, retrying once: {:#}", what, first);
            match op().await {
                Ok(v) => v,
                Err(second) => {
                    error!(
                        "Initial {} load failed twice, starting empty: {:#}",
                        what, second
                    );
                    T::default()
                }
            }
        }
    }
}
