//! Filtering, sorting, and pagination over session candidates.

use tokmesh_core::filter::{SessionFilter, SessionPage, SessionStatus, SortKey, SortOrder};
use tokmesh_core::session::Session;
use tokmesh_core::time::now_millis;

/// Reduce `candidates` to the page the filter asks for.
///
/// When no status is requested, only live sessions are returned: expired
/// entries are invisible to default reads.
pub fn apply(candidates: Vec<Session>, filter: &SessionFilter) -> SessionPage<Session> {
    let now = now_millis();

    let mut matches: Vec<Session> = candidates
        .into_iter()
        .filter(|session| matches_filter(session, filter, now))
        .collect();

    sort(&mut matches, filter.sort_by, filter.order);

    let page = filter.page.normalized();
    let total = matches.len();
    let start = page.offset().min(total);
    let end = (start + page.size).min(total);
    let items = matches[start..end].to_vec();

    SessionPage {
        items,
        total,
        page: page.number,
        page_size: page.size,
    }
}

fn matches_filter(session: &Session, filter: &SessionFilter, now: i64) -> bool {
    match filter.status {
        Some(SessionStatus::Active) | None => {
            if !session.is_live(now) {
                return false;
            }
        }
        Some(SessionStatus::Expired) => {
            if session.is_live(now) {
                return false;
            }
        }
    }

    if let Some(user_id) = &filter.user_id {
        if session.user_id != *user_id {
            return false;
        }
    }
    if let Some(device_id) = &filter.device_id {
        if session.device_id != *device_id {
            return false;
        }
    }
    if let Some(created_by) = &filter.created_by {
        if session.created_by != *created_by {
            return false;
        }
    }
    if let Some(ip_address) = &filter.ip_address {
        if session.ip_address != *ip_address {
            return false;
        }
    }
    if let Some(created_after) = filter.created_after {
        if session.created_at <= created_after {
            return false;
        }
    }
    if let Some(created_before) = filter.created_before {
        if session.created_at >= created_before {
            return false;
        }
    }
    if let Some(active_after) = filter.active_after {
        if session.last_active < active_after {
            return false;
        }
    }
    true
}

fn sort(sessions: &mut [Session], key: SortKey, order: SortOrder) {
    sessions.sort_by(|a, b| {
        let ordering = match key {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::LastActive => a.last_active.cmp(&b.last_active),
        }
        // Stable tie-break so pagination never shuffles equal keys
        .then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}
