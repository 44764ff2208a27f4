use std::collections::HashSet;

use tether_types::ModelCandidate;

use crate::agent::CapabilityService;

/// Preferred replacement models, best first.
pub const MODEL_PREFERENCE: &[&str] = &[
    "claude-sonnet-4.6",
    "claude-sonnet-4.5",
    "claude-sonnet-4",
    "gpt-5",
    "gpt-5-mini",
    "gpt-4.1",
];

/// Returned whenever the live catalog cannot name a usable model.
pub const FALLBACK_MODEL: &str = "gpt-4.1";

/// Picks a model from `catalog` that is not in `excluded`.
///
/// Preference order wins over catalog order. An empty catalog or one whose
/// entries are all excluded yields [`FALLBACK_MODEL`].
pub fn pick_fallback(catalog: &[ModelCandidate], excluded: &HashSet<String>) -> String {
    let usable = |id: &str| !excluded.contains(id) && catalog.iter().any(|m| m.id == id);

    if let Some(preferred) = MODEL_PREFERENCE.iter().copied().find(|&id| usable(id)) {
        return preferred.to_string();
    }
    catalog
        .iter()
        .map(|m| m.id.as_str())
        .find(|id| !id.trim().is_empty() && !excluded.contains(*id))
        .unwrap_or(FALLBACK_MODEL)
        .to_string()
}

pub async fn select_fallback_model(service: &dyn CapabilityService, failed_model_id: &str) -> String {
    let excluded = HashSet::from([failed_model_id.to_string()]);
    select_fallback_model_excluding(service, &excluded).await
}

pub async fn select_fallback_model_excluding(
    service: &dyn CapabilityService,
    excluded: &HashSet<String>,
) -> String {
    let catalog = match service.list_available_models().await {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::warn!("model catalog unavailable, using {FALLBACK_MODEL}: {e:#}");
            return FALLBACK_MODEL.to_string();
        }
    };
    if catalog.is_empty() {
        tracing::warn!("model catalog is empty, using {FALLBACK_MODEL}");
        return FALLBACK_MODEL.to_string();
    }

    let picked = pick_fallback(&catalog, excluded);
    tracing::info!(
        model_id = %picked,
        catalog_size = catalog.len(),
        excluded = excluded.len(),
        "selected fallback model"
    );
    picked
}

/// Whether an error says the requested model cannot be used.
pub fn is_model_unavailable(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("model")
        && ["not available", "unavailable", "not supported", "unsupported", "not found"]
            .iter()
            .any(|needle| lower.contains(needle))
}
