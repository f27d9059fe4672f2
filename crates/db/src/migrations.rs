use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "organizer",
        "organizer_sequence",
        "person",
        "course_period",
        "course_track",
        "event",
        "membership_tier",
        "discount_rule",
        "customer_order",
        "registration",
        "waitlist_entry",
        "event_registration",
        "membership",
        "ticket",
        "event_ticket",
        "payment",
        "invoice",
        "credit_note",
        "commerce_lock",
    ];

    async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
        let mut names: Vec<String> =
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(pool)
                .await
                .expect("load tables")
                .into_iter()
                .map(|row| row.get::<String, _>("name"))
                .filter(|name| MANAGED_TABLES.contains(&name.as_str()))
                .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn migrations_create_commerce_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let mut expected = MANAGED_TABLES.iter().map(|name| name.to_string()).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(table_names(&pool).await, expected);

        let lock_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commerce_lock")
            .fetch_one(&pool)
            .await
            .expect("count lock rows");
        assert_eq!(lock_rows, 1);
    }

    #[tokio::test]
    async fn ticket_table_rejects_second_ticket_for_same_period_and_person() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&pool).await.expect("relax fks");

        let insert = "INSERT INTO ticket (id, organizer_id, period_id, person_id, order_id, token,
                                          status, issued_at)
                      VALUES (?, 'org', 'period', 'person', 'order', ?, 'active', '2026-01-01')";
        sqlx::query(insert).bind("t-1").bind("TOKEN1").execute(&pool).await.expect("first");
        let duplicate = sqlx::query(insert).bind("t-2").bind("TOKEN2").execute(&pool).await;

        let error = duplicate.expect_err("unique (period_id, person_id)");
        assert!(error.as_database_error().is_some_and(|db| db.is_unique_violation()));
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(table_names(&pool).await.is_empty());

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(table_names(&pool).await.len(), MANAGED_TABLES.len());
    }
}
