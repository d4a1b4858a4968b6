//! Audit rows.
//!
//! Login, logout, and committed-action events are mirrored through the
//! storage interface as parameterized insert statements, alongside the
//! `tracing` lines the rest of the engine emits. The logout row reuses
//! the login row's event id so the two halves of one visit pair up.

use gatehouse_core::{ResultSet, Storage, StorageError, UserRecord};

/// Login-event table name.
pub const LOGIN_TABLE: &str = "login_events";
/// Logout-event table name.
pub const LOGOUT_TABLE: &str = "logout_events";
/// Committed-action table name.
pub const ACTION_TABLE: &str = "action_events";

/// Appends a login row keyed by `login_id`.
pub async fn record_login(
    storage: &dyn Storage,
    login_id: &str,
    user: &UserRecord,
) -> Result<(), StorageError> {
    let at = chrono::Utc::now().to_rfc3339();
    storage
        .execute(
            "insert into login_events (login_id, user_id, username, host, at) \
             values (?, ?, ?, ?, ?)",
            &[login_id, user.id.as_str(), &user.username, &user.host, &at],
        )
        .await
}

/// Appends a logout row under the same `login_id` as the matching login.
pub async fn record_logout(
    storage: &dyn Storage,
    login_id: &str,
    username: &str,
) -> Result<(), StorageError> {
    let at = chrono::Utc::now().to_rfc3339();
    storage
        .execute(
            "insert into logout_events (login_id, username, at) values (?, ?, ?)",
            &[login_id, username, &at],
        )
        .await
}

/// Appends a committed-action row.
pub async fn record_action(
    storage: &dyn Storage,
    actor_id: &str,
    actor_name: &str,
    action: &str,
    description: &str,
) -> Result<(), StorageError> {
    let at = chrono::Utc::now().to_rfc3339();
    storage
        .execute(
            "insert into action_events (actor_id, actor_name, action, description, at) \
             values (?, ?, ?, ?, ?)",
            &[actor_id, actor_name, action, description, &at],
        )
        .await
}

/// Reads audit rows from one table, newest first. A limit of zero means
/// all rows.
pub async fn history(
    storage: &dyn Storage,
    table: &str,
    limit: u64,
) -> Result<ResultSet, StorageError> {
    if limit == 0 {
        storage
            .query(&format!("select * from {table} order by at desc"), &[])
            .await
    } else {
        let limit = limit.to_string();
        storage
            .query(
                &format!("select * from {table} order by at desc limit ?"),
                &[&limit],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use gatehouse_core::MemoryStorage;

    use super::*;

    #[tokio::test]
    async fn action_row_carries_actor_and_description() {
        let storage = MemoryStorage::new();
        record_action(&storage, "SYSTEM_000", "SYSTEM_000", "create_user", "seed")
            .await
            .expect("record");
        let recorded = storage.recorded();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].statement.contains(ACTION_TABLE));
        assert_eq!(&recorded[0].params[..4], ["SYSTEM_000", "SYSTEM_000", "create_user", "seed"]);
    }

    #[tokio::test]
    async fn zero_limit_reads_everything() {
        let storage = MemoryStorage::new();
        history(&storage, LOGIN_TABLE, 0).await.expect("query");
        history(&storage, LOGIN_TABLE, 5).await.expect("query");
        let recorded = storage.recorded();
        assert!(!recorded[0].statement.contains("limit"));
        assert!(recorded[1].statement.contains("limit"));
        assert_eq!(recorded[1].params, vec!["5"]);
    }
}
