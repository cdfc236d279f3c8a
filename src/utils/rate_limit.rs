use mongodb::bson::{doc, DateTime, Document};

use crate::db::{DbConn, RATE_LIMITS};
use super::ApiError;

/// What a request does to a stored counter.
#[derive(Debug, PartialEq, Eq)]
enum Window {
    /// No live window: start a fresh one at count 1.
    Start,
    /// Inside the window and under the limit.
    Count,
    Reject,
}

fn window_decision(count: i32, expires_at_ms: Option<i64>, now_ms: i64, limit: i32) -> Window {
    match expires_at_ms {
        Some(expires) if expires > now_ms => {
            if count >= limit {
                Window::Reject
            } else {
                Window::Count
            }
        }
        _ => Window::Start,
    }
}

/// Fixed-window counter stored in MongoDB, keyed by caller-chosen strings
/// such as `login:<email>`.
pub async fn rate_limit(
    db: &DbConn,
    key: &str,
    limit: i32,
    window_ms: i64,
) -> Result<(), ApiError> {
    let now = chrono::Utc::now().timestamp_millis();
    let window_expires = DateTime::from_millis(now + window_ms);

    let collection = db.collection::<Document>(RATE_LIMITS);

    let existing = collection
        .find_one(doc! { "key": key }, None)
        .await
        .map_err(|_| ApiError::internal_error("Rate limiter lookup failed"))?;

    let decision = match existing {
        None => {
            collection
                .insert_one(
                    doc! {
                        "key": key,
                        "count": 1,
                        "expires_at": window_expires
                    },
                    None,
                )
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter insert failed"))?;
            return Ok(());
        }
        Some(d) => window_decision(
            d.get_i32("count").unwrap_or(0),
            d.get_datetime("expires_at").ok().map(|e| e.timestamp_millis()),
            now,
            limit,
        ),
    };

    match decision {
        Window::Start => {
            collection
                .update_one(
                    doc! { "key": key },
                    doc! {
                        "$set": {
                            "count": 1,
                            "expires_at": window_expires
                        }
                    },
                    None,
                )
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter reset failed"))?;
            Ok(())
        }
        Window::Count => {
            collection
                .update_one(doc! { "key": key }, doc! { "$inc": { "count": 1 } }, None)
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter increment failed"))?;
            Ok(())
        }
        Window::Reject => Err(ApiError::too_many_requests(
            "Too many requests. Please try later.",
        )),
    }
}

/// Clears a key, e.g. after a successful login.
pub async fn reset(db: &DbConn, key: &str) {
    if let Err(e) = db
        .collection::<Document>(RATE_LIMITS)
        .delete_one(doc! { "key": key }, None)
        .await
    {
        log::warn!("Failed to clear rate limit {}: {}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn counts_up_to_the_limit_inside_a_window() {
        let live = Some(NOW + 60_000);
        assert_eq!(window_decision(1, live, NOW, 5), Window::Count);
        assert_eq!(window_decision(4, live, NOW, 5), Window::Count);
        assert_eq!(window_decision(5, live, NOW, 5), Window::Reject);
        assert_eq!(window_decision(9, live, NOW, 5), Window::Reject);
    }

    #[test]
    fn expired_or_broken_windows_start_over() {
        assert_eq!(window_decision(5, Some(NOW - 1), NOW, 5), Window::Start);
        assert_eq!(window_decision(5, Some(NOW), NOW, 5), Window::Start);
        assert_eq!(window_decision(5, None, NOW, 5), Window::Start);
    }
}
