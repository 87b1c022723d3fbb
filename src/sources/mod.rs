//! Source adapters: uniform wrappers around the upstream origins that all
//! produce tiles flowing through the same registration path.

pub mod dynamic;
pub mod edits;
pub mod live;
pub mod local;
pub mod static_file;
pub mod store;

use crate::core::config::{LayerConfig, LayerId};
use crate::data::feature::Feature;
use crate::Result;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use std::sync::Arc;

/// Shared blocking HTTP client with a custom User-Agent so that public data
/// servers don't reject the request. Building the client once avoids the
/// cost of TLS and connection pool setup for every fetch.
pub(crate) static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent("tilesync/0.1 (+https://github.com/tilesync/tilesync)")
        .build()
        .expect("failed to build reqwest blocking client")
});

/// Fetches a remote file as text. The seam that lets tests feed canned
/// documents to the file-backed sources.
pub trait FileFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Default [`FileFetcher`] over the shared HTTP client.
pub struct HttpFetcher;

impl FileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let response = HTTP_CLIENT.get(url).send()?;
        if !response.status().is_success() {
            return Err(crate::Error::TransientFetch(format!(
                "{}: HTTP {}",
                url,
                response.status()
            ))
            .into());
        }
        Ok(response.text()?)
    }
}

/// Assigns shared-fetch features to layers via each layer's tag matcher.
/// Features matching no configured layer are dropped; layers without a
/// matcher receive nothing from shared fetches.
pub fn split_per_layer(
    features: Vec<Feature>,
    layers: &[Arc<LayerConfig>],
) -> Vec<(LayerId, Vec<Feature>)> {
    let mut per_layer: Vec<(LayerId, Vec<Feature>)> = layers
        .iter()
        .map(|layer| (layer.id.clone(), Vec::new()))
        .collect();

    for feature in features {
        let slot = layers.iter().position(|layer| {
            layer
                .matcher
                .as_ref()
                .map(|m| m.matches(&feature.tags))
                .unwrap_or(false)
        });
        match slot {
            Some(i) => per_layer[i].1.push(feature),
            None => log::debug!("feature {} matches no configured layer", feature.id),
        }
    }

    per_layer.retain(|(_, features)| !features.is_empty());
    per_layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{LayerUpstream, TagMatcher};

    #[test]
    fn test_split_per_layer_routes_by_matcher() {
        let benches = Arc::new(
            LayerConfig::new("benches", 10, LayerUpstream::LiveApi)
                .with_matcher(TagMatcher::all(vec![("amenity", "bench")])),
        );
        let unmatched = Arc::new(LayerConfig::new("plain", 10, LayerUpstream::LiveApi));
        let layers = vec![benches, unmatched];

        let features = vec![
            Feature::point("node/1", 51.0, 3.7).tag("amenity", "bench"),
            Feature::point("node/2", 51.0, 3.7).tag("amenity", "fountain"),
        ];

        let split = split_per_layer(features, &layers);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].0, "benches");
        assert_eq!(split[0].1.len(), 1);
        assert_eq!(split[0].1[0].id, "node/1");
    }
}
