use std::time::{Duration, SystemTime};

use httpdate::parse_http_date;

use crate::protocol::EnvelopeItem;
use crate::Envelope;

// Backoff assumed for a 429 that carries no timing header at all.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Tracks the backoff windows the collector has asked us to honor.
///
/// A window is a deadline per payload category, plus a global one that
/// covers every request. Once the wall clock passes a deadline, sends of
/// that category resume on their own; nothing needs to be reset.
#[derive(Debug, Default)]
pub struct RateLimiter {
    global: Option<SystemTime>,
    error: Option<SystemTime>,
    session: Option<SystemTime>,
    transaction: Option<SystemTime>,
}

impl RateLimiter {
    /// Creates a limiter with no windows open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the backoff from a `Retry-After` header.
    ///
    /// Both forms the HTTP spec allows are accepted, a number of seconds
    /// or an HTTP date. Anything else leaves the limiter untouched.
    pub fn update_from_retry_after(&mut self, header: &str) {
        let deadline = if let Ok(seconds) = header.parse::<f64>() {
            deadline_in(Duration::from_secs(seconds.ceil() as u64))
        } else {
            parse_http_date(header).ok()
        };
        if deadline.is_some() {
            self.global = deadline;
        }
    }

    /// Records the categorized backoffs from an `x-flare-rate-limits`
    /// header.
    ///
    /// The header is a comma separated list of groups of the form
    /// `seconds:categories:scope(:reason)`, with `categories` itself a
    /// semicolon separated list. An empty category list limits everything.
    /// Malformed groups are skipped, unknown category names are ignored.
    pub fn update_from_limits_header(&mut self, header: &str) {
        for group in header.split(',') {
            self.apply_limit_group(group.trim());
        }
    }

    fn apply_limit_group(&mut self, group: &str) -> Option<()> {
        let mut fields = group.split(':');
        let seconds = fields.next()?.parse::<f64>().ok()?;
        let categories = fields.next()?;
        fields.next()?; // scope, unused here

        let deadline = deadline_in(Duration::from_secs(seconds.ceil() as u64))?;
        if categories.is_empty() {
            self.global = Some(deadline);
        }
        for category in categories.split(';') {
            match category {
                "error" => self.error = Some(deadline),
                "session" => self.session = Some(deadline),
                "transaction" => self.transaction = Some(deadline),
                _ => {}
            }
        }
        Some(())
    }

    /// Records the default backoff for a `429` without timing headers.
    pub fn update_from_429(&mut self) {
        if let Some(deadline) = deadline_in(DEFAULT_RETRY_AFTER) {
            self.global = Some(deadline);
        }
    }

    /// Returns the time left on the window covering `category`, if one is
    /// open.
    ///
    /// The global window applies to every category.
    pub fn is_disabled(&self, category: RateLimitingCategory) -> Option<Duration> {
        let now = SystemTime::now();
        if let Some(left) = self.global.and_then(|deadline| deadline.duration_since(now).ok()) {
            return Some(left);
        }
        let deadline = match category {
            RateLimitingCategory::Any => self.global,
            RateLimitingCategory::Error => self.error,
            RateLimitingCategory::Session => self.session,
            RateLimitingCategory::Transaction => self.transaction,
        }?;
        deadline.duration_since(now).ok()
    }

    /// Whether sends of `category` are currently blocked.
    pub fn is_rate_limited(&self, category: RateLimitingCategory) -> bool {
        self.is_disabled(category).is_some()
    }

    /// Strips items in blocked categories out of the envelope.
    ///
    /// Returns `None` when nothing sendable remains.
    pub fn filter_envelope(&self, envelope: Envelope) -> Option<Envelope> {
        envelope.filter(|item| {
            !self.is_rate_limited(match item {
                EnvelopeItem::Event(_) => RateLimitingCategory::Error,
                EnvelopeItem::SessionUpdate(_) | EnvelopeItem::SessionAggregates(_) => {
                    RateLimitingCategory::Session
                }
                EnvelopeItem::Transaction(_) => RateLimitingCategory::Transaction,
                _ => RateLimitingCategory::Any,
            })
        })
    }
}

fn deadline_in(backoff: Duration) -> Option<SystemTime> {
    SystemTime::now().checked_add(backoff)
}

/// The payload category a backoff window refers to.
#[non_exhaustive]
pub enum RateLimitingCategory {
    /// A window over every kind of payload.
    Any,
    /// A window over error events.
    Error,
    /// A window over session updates and aggregates.
    Session,
    /// A window over transactions.
    Transaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Event, SessionAttributes, SessionStatus, SessionUpdate};

    fn session_update() -> SessionUpdate<'static> {
        SessionUpdate {
            session_id: Default::default(),
            distinct_id: None,
            sequence: None,
            timestamp: None,
            started: SystemTime::now(),
            init: true,
            duration: None,
            status: SessionStatus::Ok,
            errors: 0,
            attributes: SessionAttributes {
                release: "app@1.0".into(),
                environment: None,
                ip_address: None,
                user_agent: None,
            },
        }
    }

    #[test]
    fn test_windows_open_per_category() {
        let mut rl = RateLimiter::new();
        rl.update_from_limits_header("300:error:org:quota, 10:transaction:project");

        assert!(rl.is_disabled(RateLimitingCategory::Error).unwrap() <= Duration::from_secs(300));
        assert!(
            rl.is_disabled(RateLimitingCategory::Transaction).unwrap() <= Duration::from_secs(10)
        );
        assert!(rl.is_disabled(RateLimitingCategory::Session).is_none());
        assert!(rl.is_disabled(RateLimitingCategory::Any).is_none());
    }

    #[test]
    fn test_empty_category_list_blocks_everything() {
        let mut rl = RateLimiter::new();
        rl.update_from_limits_header("15::key, totally-bogus, 9000:unknown-kind:org");

        // only the empty-category group should have taken effect
        assert!(rl.is_disabled(RateLimitingCategory::Any).unwrap() <= Duration::from_secs(15));
        assert!(rl.is_disabled(RateLimitingCategory::Session).unwrap() <= Duration::from_secs(15));
    }

    #[test]
    fn test_retry_after_seconds_and_date() {
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("120");
        assert!(rl.is_disabled(RateLimitingCategory::Any).unwrap() <= Duration::from_secs(120));

        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("Sat, 01 Jan 2118 00:00:00 GMT");
        assert!(rl.is_rate_limited(RateLimitingCategory::Error));

        // a date in the past is an already expired window
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("Mon, 01 Jan 2018 00:00:00 GMT");
        assert!(!rl.is_rate_limited(RateLimitingCategory::Any));
    }

    #[test]
    fn test_absurd_retry_after_is_ignored() {
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("1e300");
        assert!(rl.is_disabled(RateLimitingCategory::Any).is_none());

        rl.update_from_retry_after("inf");
        assert!(rl.is_disabled(RateLimitingCategory::Any).is_none());

        rl.update_from_limits_header("1e300:error:org");
        assert!(rl.is_disabled(RateLimitingCategory::Error).is_none());
    }

    #[test]
    fn test_429_opens_default_window() {
        let mut rl = RateLimiter::new();
        rl.update_from_429();
        assert!(rl.is_disabled(RateLimitingCategory::Any).unwrap() <= DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn test_filter_strips_blocked_items() {
        let mut rl = RateLimiter::new();
        rl.update_from_limits_header("60:error;transaction:project");

        let mut envelope = Envelope::new();
        envelope.add_item(Event::default());
        envelope.add_item(session_update());

        let filtered = rl.filter_envelope(envelope).unwrap();
        let mut items = filtered.items();
        assert!(matches!(items.next(), Some(EnvelopeItem::SessionUpdate(_))));
        assert_eq!(items.next(), None);
    }

    #[test]
    fn test_filter_drops_fully_blocked_envelope() {
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("60");

        let mut envelope = Envelope::new();
        envelope.add_item(session_update());
        assert!(rl.filter_envelope(envelope).is_none());
    }
}
