use enrolla_core::access::Caller;
use enrolla_core::domain::order::OrderId;
use enrolla_core::errors::ApplicationError;
use enrolla_core::services::FulfillmentOutcome;

use crate::commands::{build_runtime, load_config, open_store, services, CommandResult, Failure};

pub fn run(order_id: &str, provider_ref: &str) -> CommandResult {
    if provider_ref.trim().is_empty() {
        return CommandResult::failure(
            "fulfill",
            "invalid_argument",
            "--provider-ref must not be blank",
            2,
        );
    }

    let config = match load_config("fulfill") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("fulfill") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let order_id = OrderId(order_id.trim().to_string());
    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let outcome = services(&config, store.clone())
            .fulfillment
            .fulfill_order(&Caller::system("operator-cli"), &order_id, provider_ref.trim())
            .await
            .map_err(classify);
        store.pool().close().await;
        outcome
    });

    match result {
        Ok(outcome) => {
            let message = match &outcome {
                FulfillmentOutcome::Fulfilled(receipt) => format!(
                    "order {} fulfilled as #{} with invoice {}",
                    receipt.order_id.0, receipt.order_number, receipt.invoice_number
                ),
                FulfillmentOutcome::AlreadyFulfilled { order_id, .. } => {
                    format!("order {} was already paid; nothing changed", order_id.0)
                }
            };
            let details = serde_json::to_value(&outcome).ok();
            CommandResult::success_with_details("fulfill", message, details)
        }
        Err(failure) => CommandResult::from_failure("fulfill", failure),
    }
}

fn classify(error: ApplicationError) -> Failure {
    let error_class = match &error {
        ApplicationError::NotFound { .. } => "not_found",
        ApplicationError::Conflict(_) => "conflict",
        ApplicationError::Domain(_) => "domain_rule",
        _ => "fulfillment",
    };
    (error_class, error.to_string(), 6u8)
}
