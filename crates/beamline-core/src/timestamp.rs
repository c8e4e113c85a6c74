use chrono::{DateTime, Utc};

/// Extracts the event time from a caller value.
///
/// Implemented for any `Fn(&T) -> DateTime<Utc>` closure, so callers can
/// pass a lambda straight to the builder.
pub trait Timestamper<T>: Send + Sync {
    fn timestamp(&self, event: &T) -> DateTime<Utc>;
}

impl<T, F> Timestamper<T> for F
where
    F: Fn(&T) -> DateTime<Utc> + Send + Sync,
{
    fn timestamp(&self, event: &T) -> DateTime<Utc> {
        self(event)
    }
}
