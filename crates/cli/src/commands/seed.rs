use proposal_db::{CatalogSeed, SeedResult};

use crate::commands::{load_config, open_database, runtime, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seeded = CatalogSeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = CatalogSeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if verification.all_present {
            Ok::<SeedResult, StepFailure>(seeded)
        } else {
            let failed_checks: Vec<_> = verification
                .checks
                .iter()
                .filter_map(|(sku, present)| (!present).then_some(*sku))
                .collect();
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err(failure) => CommandResult::from_step("seed", failure),
    }
}

fn summary(seeded: &SeedResult) -> String {
    let total = seeded.inserted + seeded.skipped;
    format!(
        "reference catalog ready: {total} products ({} inserted, {} already present)",
        seeded.inserted, seeded.skipped
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed products failed to load".to_string()
    } else {
        format!("Seed verification failed for SKUs: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use proposal_db::SeedResult;

    use super::{summary, verification_message};

    #[test]
    fn verification_error_message_targets_failed_skus() {
        assert_eq!(
            verification_message(&["VOD-EV-002", "VOD-5G-001"]),
            "Seed verification failed for SKUs: VOD-EV-002, VOD-5G-001"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed products failed to load");
    }

    #[test]
    fn summary_counts_inserted_and_existing_products() {
        assert_eq!(
            summary(&SeedResult { inserted: 2, skipped: 6 }),
            "reference catalog ready: 8 products (2 inserted, 6 already present)"
        );
    }
}
