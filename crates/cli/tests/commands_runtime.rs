use std::env;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use enrolla_cli::commands::{config, doctor, expire_offers, fulfill, migrate, seed};
use enrolla_core::access::Caller;
use enrolla_core::domain::cart::{Cart, CartItem, CartItemRef};
use enrolla_core::domain::catalog::{EventId, PriceBasis};
use enrolla_core::domain::order::OrderId;
use enrolla_core::domain::organizer::{OrganizerId, PersonId};
use enrolla_core::services::{CommerceServices, ServiceDeps};
use enrolla_db::fixtures::{DANCER_IDS, EVENT_ID, ORGANIZER_ID};
use enrolla_db::{connect_with_settings, SqlCommerceStore};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = tempfile::tempdir().expect("temp dir");
    with_env(&[("ENROLLA_DATABASE_URL", &database_url(dir.path()))], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("ENROLLA_DATABASE_URL", "postgres://localhost/enrolla")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("temp dir");
    with_env(&[("ENROLLA_DATABASE_URL", &database_url(dir.path()))], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(first_payload["details"]["tracks"], 3);
        assert_eq!(first_payload["details"]["discount_rules"], 3);

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
        assert_eq!(first_payload["details"], second_payload["details"]);
    });
}

#[test]
fn expire_offers_reports_an_empty_sweep_on_a_fresh_catalog() {
    let dir = tempfile::tempdir().expect("temp dir");
    with_env(&[("ENROLLA_DATABASE_URL", &database_url(dir.path()))], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = expire_offers::run();
        assert_eq!(result.exit_code, 0);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "expire-offers");
        assert_eq!(payload["details"]["expired"], Value::Array(Vec::new()));
    });
}

#[test]
fn fulfill_marks_an_order_paid_once_and_reports_redelivery() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(dir.path());
    with_env(&[("ENROLLA_DATABASE_URL", &url)], || {
        assert_eq!(seed::run().exit_code, 0);
        let order_id = place_event_order(&url);

        let first = fulfill::run(&order_id.0, "bank-transfer-881");
        assert_eq!(first.exit_code, 0, "{}", first.output);
        let payload = parse_payload(&first.output);
        assert_eq!(payload["details"]["outcome"], "fulfilled");
        assert_eq!(payload["details"]["order_number"], 1);
        assert_eq!(payload["details"]["invoice_number"], "SO-0001");

        let second = fulfill::run(&order_id.0, "bank-transfer-881");
        assert_eq!(second.exit_code, 0);
        let payload = parse_payload(&second.output);
        assert_eq!(payload["details"]["outcome"], "already_fulfilled");
        assert_eq!(payload["details"]["order_number"], 1);
    });
}

#[test]
fn fulfill_rejects_unknown_orders_and_blank_references() {
    let dir = tempfile::tempdir().expect("temp dir");
    with_env(&[("ENROLLA_DATABASE_URL", &database_url(dir.path()))], || {
        let missing = fulfill::run("ord-does-not-exist", "ref-1");
        assert_eq!(missing.exit_code, 6);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");

        let blank = fulfill::run("ord-does-not-exist", "   ");
        assert_eq!(blank.exit_code, 2);
        assert_eq!(parse_payload(&blank.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    with_env(
        &[
            ("ENROLLA_PAYMENTS_WEBHOOK_SECRET", "whsec-super-secret-value"),
            ("ENROLLA_WAITLIST_DEFAULT_OFFER_HOURS", "24"),
        ],
        || {
            let output = config::run();
            assert!(!output.contains("whsec-super-secret-value"));
            assert!(output.contains(
                "- payments.webhook_secret = <redacted> \
                 (source: env (ENROLLA_PAYMENTS_WEBHOOK_SECRET))"
            ));
            assert!(output.contains(
                "- waitlist.default_offer_hours = 24 \
                 (source: env (ENROLLA_WAITLIST_DEFAULT_OFFER_HOURS))"
            ));
            assert!(output.contains("- billing.invoice_prefix = INV (source: default)"));
            assert!(output.contains("- notifications.endpoint = <unset> (source: default)"));
        },
    );
}

#[test]
fn doctor_warns_without_webhook_secret_but_passes_connectivity() {
    let dir = tempfile::tempdir().expect("temp dir");
    with_env(&[("ENROLLA_DATABASE_URL", &database_url(dir.path()))], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0);

        let report: Value = serde_json::from_str(&result.output).expect("doctor json");
        assert_eq!(report["overall_status"], "warn");
        let statuses: Vec<(&str, &str)> = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .map(|check| {
                (check["name"].as_str().unwrap_or(""), check["status"].as_str().unwrap_or(""))
            })
            .collect();
        assert!(statuses.contains(&("payment_webhook_secret", "warn")));
        assert!(statuses.contains(&("database_connectivity", "pass")));
    });
}

#[test]
fn doctor_fails_when_config_is_invalid() {
    with_env(&[("ENROLLA_BILLING_NUMBER_WIDTH", "0")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 7);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

fn place_event_order(url: &str) -> OrderId {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 30).await.expect("connect");
        let store = Arc::new(SqlCommerceStore::new(pool));
        let services = CommerceServices::new(ServiceDeps::new(Arc::clone(&store)));

        let person_id = PersonId(DANCER_IDS[0].to_string());
        let organizer_id = OrganizerId(ORGANIZER_ID.to_string());
        let cart = Cart {
            organizer_id: organizer_id.clone(),
            purchaser_id: person_id.clone(),
            items: vec![CartItem {
                item: CartItemRef::Event { event_id: EventId(EVENT_ID.to_string()) },
                role: None,
                with_partner: false,
                price_basis: PriceBasis::Single,
                unit_price_cents: 0,
                quantity: 1,
                organizer_id,
            }],
        };
        let outcome = services
            .checkout
            .place_order(&Caller::person(person_id, "ada@dancers.test"), cart)
            .await
            .expect("place order");
        store.pool().close().await;
        outcome.order.expect("order placed").id
    })
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("enrolla.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("ENROLLA_"))
        .collect();
    let previous_values: Vec<(String, String)> = keys
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.clone(), value)))
        .collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, _) in vars {
        env::remove_var(key);
    }
    for (key, value) in previous_values {
        env::set_var(key, value);
    }
}
