use enrolla_core::access::Caller;
use serde_json::json;

use crate::commands::{build_runtime, load_config, open_store, services, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("expire-offers") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("expire-offers") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let sweep = services(&config, store.clone())
            .waitlist
            .expire_offers(&Caller::system("operator-cli"))
            .await
            .map_err(|error| ("waitlist_sweep", error.to_string(), 6u8));
        store.pool().close().await;
        sweep
    });

    match result {
        Ok(sweep) => CommandResult::success_with_details(
            "expire-offers",
            format!("expired {} waitlist offer(s)", sweep.count()),
            Some(json!({
                "expired": sweep.expired.iter().map(|id| id.0.as_str()).collect::<Vec<_>>(),
            })),
        ),
        Err(failure) => CommandResult::from_failure("expire-offers", failure),
    }
}
