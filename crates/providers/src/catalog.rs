//! Model catalog: the normalized set of models the provider currently
//! offers, plus ranking for the model picker.
//!
//! The catalog is replaced wholesale on every refresh; descriptors are
//! never patched in place.

use serde::{Deserialize, Serialize};
use shared::collab::KeyValueStore;
use std::cmp::Ordering;
use tracing::warn;

/// Key in the persistence collaborator holding the recency list
/// (JSON array of model ids, most recent first).
pub const RECENT_MODELS_KEY: &str = "recent-model-ids";

/// The recency list never grows past this many entries.
pub const MAX_RECENT_MODELS: usize = 10;

/// One normalized entry from the provider listing.
///
/// Prices are USD per one million tokens of the given class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub context_length: u32,
    pub prompt_price: f64,
    pub completion_price: f64,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    /// Prefix of the id before the first `/`, e.g. `anthropic`.
    pub provider: String,
}

impl ModelDescriptor {
    pub fn average_price(&self) -> f64 {
        (self.prompt_price + self.completion_price) / 2.0
    }

    pub fn is_free(&self) -> bool {
        self.prompt_price == 0.0 && self.completion_price == 0.0
    }
}

// ── Raw listing (wire shape) ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ModelListing {
    #[serde(default)]
    pub data: Vec<RawModel>,
}

#[derive(Debug, Deserialize)]
pub struct RawModel {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    context_length: Option<i64>,
    #[serde(default)]
    pricing: Option<RawPricing>,
    #[serde(default)]
    capabilities: Option<RawCapabilities>,
}

/// Listing prices are strings in USD per single token.
#[derive(Debug, Deserialize)]
struct RawPricing {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCapabilities {
    #[serde(default)]
    vision: Option<bool>,
    #[serde(default)]
    tools: Option<bool>,
    #[serde(default)]
    streaming: Option<bool>,
}

fn parse_price_per_million(raw: Option<&str>) -> Option<f64> {
    let per_token: f64 = raw?.trim().parse().ok()?;
    if per_token < 0.0 {
        return None;
    }
    Some(per_token * 1_000_000.0)
}

fn normalize(raw: RawModel) -> Option<ModelDescriptor> {
    if raw.id.is_empty() {
        return None;
    }
    let context_length = match raw.context_length {
        Some(n) if n > 0 => n as u32,
        _ => return None,
    };
    let pricing = raw.pricing.as_ref()?;
    let prompt_price = parse_price_per_million(pricing.prompt.as_deref())?;
    let completion_price = parse_price_per_million(pricing.completion.as_deref())?;

    let caps = raw.capabilities.unwrap_or_default();
    let provider = raw.id.split('/').next().unwrap_or_default().to_string();
    let name = raw.name.filter(|n| !n.is_empty()).unwrap_or_else(|| raw.id.clone());

    Some(ModelDescriptor {
        id: raw.id,
        name,
        context_length,
        prompt_price,
        completion_price,
        supports_vision: caps.vision.unwrap_or(false),
        supports_tools: caps.tools.unwrap_or(false),
        // The listing rarely says; streaming is the norm.
        supports_streaming: caps.streaming.unwrap_or(true),
        provider,
    })
}

// ── Catalog ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Normalize a raw provider listing. Malformed entries are dropped;
    /// a partial catalog is expected and valid.
    pub fn from_listing(listing: ModelListing) -> Self {
        let total = listing.data.len();
        let models: Vec<ModelDescriptor> =
            listing.data.into_iter().filter_map(normalize).collect();
        if models.len() < total {
            warn!(
                "dropped {} malformed model entries from listing",
                total - models.len()
            );
        }
        Self { models }
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    /// Order models for presentation: recently used ids first (in recency
    /// order), then the rest by descending average price with free models
    /// last, ties broken by id.
    pub fn ranked(&self, recent_ids: &[String]) -> Vec<&ModelDescriptor> {
        let recent = &recent_ids[..recent_ids.len().min(MAX_RECENT_MODELS)];

        let mut head: Vec<&ModelDescriptor> = Vec::new();
        for id in recent {
            if let Some(m) = self.get(id) {
                head.push(m);
            }
        }

        let mut rest: Vec<&ModelDescriptor> = self
            .models
            .iter()
            .filter(|m| !recent.contains(&m.id))
            .collect();
        rest.sort_by(|a, b| match (a.is_free(), b.is_free()) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => b
                .average_price()
                .partial_cmp(&a.average_price())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id)),
        });

        head.extend(rest);
        head
    }
}

// ── Recency tracking ─────────────────────────────────────────────────

/// Read the recency list from the persistence collaborator.
pub fn load_recent_models(store: &dyn KeyValueStore) -> Vec<String> {
    store
        .get(RECENT_MODELS_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Move `id` to the front of the recency list, capped at
/// [`MAX_RECENT_MODELS`] entries.
pub fn record_model_use(store: &dyn KeyValueStore, id: &str) {
    let mut recent = load_recent_models(store);
    recent.retain(|m| m != id);
    recent.insert(0, id.to_string());
    recent.truncate(MAX_RECENT_MODELS);
    if let Ok(raw) = serde_json::to_string(&recent) {
        store.set(RECENT_MODELS_KEY, &raw);
    }
}
