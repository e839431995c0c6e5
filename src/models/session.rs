//! Chat-to-thread session entity and its freshness policy.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Durable mapping from a chat to the agent thread serving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ThreadSession {
    /// Chat identifier; unique key.
    pub chat_id: String,
    /// Agent-side thread id.
    pub thread_id: String,
    /// Creation time, second resolution.
    pub created_at: DateTime<Utc>,
    /// Last activity time, second resolution.
    pub updated_at: DateTime<Utc>,
}

impl ThreadSession {
    /// New session stamped with `now` for both timestamps.
    #[must_use]
    pub fn new(chat_id: String, thread_id: String, now: DateTime<Utc>) -> Self {
        Self {
            chat_id,
            thread_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Decides whether an existing session may be reused.
///
/// A session goes stale when it has been idle longer than
/// `idle_timeout_minutes`, or when it was last used before the most recent
/// occurrence of `daily_reset_hour`. Non-positive idle timeouts and negative
/// reset hours disable the respective check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Idle limit in minutes; `<= 0` disables.
    pub idle_timeout_minutes: i64,
    /// Hour of day (0..=23) at which sessions reset; `< 0` disables.
    pub daily_reset_hour: i32,
}

impl From<&SessionConfig> for FreshnessPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            idle_timeout_minutes: config.idle_timeout_minutes,
            daily_reset_hour: config.daily_reset_hour,
        }
    }
}

impl FreshnessPolicy {
    /// Whether stale-session cleanup has anything to do.
    #[must_use]
    pub fn idle_check_enabled(&self) -> bool {
        self.idle_timeout_minutes > 0
    }

    /// Evaluate freshness at `now`. The daily boundary is computed in `now`'s
    /// time zone. A missing entry is never fresh.
    #[must_use]
    pub fn is_fresh_at<Tz: TimeZone>(
        &self,
        entry: Option<&ThreadSession>,
        now: &DateTime<Tz>,
    ) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        let now_utc = now.with_timezone(&Utc);

        if self.idle_check_enabled()
            && now_utc - entry.updated_at > Duration::minutes(self.idle_timeout_minutes)
        {
            return false;
        }

        if let Some(boundary) = self.last_reset_before(now) {
            if entry.updated_at < boundary {
                return false;
            }
        }

        true
    }

    /// Most recent occurrence of the reset hour at or before `now`.
    fn last_reset_before<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let hour = u32::try_from(self.daily_reset_hour).ok().filter(|h| *h <= 23)?;
        let at = NaiveTime::from_hms_opt(hour, 0, 0)?;
        let tz = now.timezone();
        let day = now.date_naive();

        if let Some(today) = local_instant(&tz, day.and_time(at)) {
            if today <= now.with_timezone(&Utc) {
                return Some(today);
            }
        }
        local_instant(&tz, day.pred_opt()?.and_time(at))
    }
}

/// First instant showing `local` on the wall clock. A time skipped by a
/// forward clock change resolves to the end of the skipped span.
fn local_instant<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return Some(dt.with_timezone(&Utc));
    }
    (1..=24)
        .map(|quarters| local + Duration::minutes(15 * quarters))
        .find_map(|later| tz.from_local_datetime(&later).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}
