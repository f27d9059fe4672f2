use chrono::Utc;
use serde_json::json;

use crate::commands::{build_runtime, load_config, open_store, CommandResult, Failure};
use enrolla_db::{DemoCatalog, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;

        let seeded = DemoCatalog::load(store.as_ref(), Utc::now())
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoCatalog::verify(store.as_ref())
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedResult, Failure> = if verification.all_present {
            Ok(seeded)
        } else {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, present)| (!present).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        };

        store.pool().close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success_with_details(
            "seed",
            format!(
                "demo catalog loaded for organizer {} (period {})",
                seeded.organizer_id.0, seeded.period_id.0
            ),
            Some(json!({
                "people": seeded.people_seeded,
                "tracks": seeded.tracks_seeded,
                "events": seeded.events_seeded,
                "membership_tiers": seeded.tiers_seeded,
                "discount_rules": seeded.rules_seeded,
            })),
        ),
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo catalog rows failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
