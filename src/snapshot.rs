use std::{collections::HashMap, sync::Arc};

use derive_more::Display;
use serde::Serialize;

use crate::{
    models::{FeatureCollection, FeatureDefinition, Segment},
    Result,
};

/// Outcome of the fetch that produced a snapshot.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// New definitions were received.
    Changed,
    /// The server confirmed our definitions are current, or the fetch was skipped.
    NotChanged,
    /// No usable answer from the server.
    Unavailable,
}

/// Immutable set of feature definitions and the segments they reference. Replaced wholesale,
/// never mutated.
#[derive(Debug, Clone)]
pub struct Snapshot {
    features: Arc<HashMap<String, FeatureDefinition>>,
    segments: Arc<HashMap<u32, Segment>>,
    etag: Option<String>,
    status: FetchStatus,
}

impl Snapshot {
    /// Snapshot without features. Every evaluation against it falls back.
    pub fn empty() -> Snapshot {
        Snapshot::new(HashMap::new(), None, FetchStatus::Unavailable)
    }

    pub fn new(
        features: HashMap<String, FeatureDefinition>,
        etag: Option<String>,
        status: FetchStatus,
    ) -> Snapshot {
        Snapshot {
            features: Arc::new(features),
            segments: Arc::default(),
            etag,
            status,
        }
    }

    /// Same features, with `segments` for strategies to reference.
    pub fn with_segments(mut self, segments: HashMap<u32, Segment>) -> Snapshot {
        self.segments = Arc::new(segments);
        self
    }

    /// Index `definitions` by name. The first definition of a name wins.
    pub fn from_definitions<I>(definitions: I) -> Snapshot
    where
        I: IntoIterator<Item = FeatureDefinition>,
    {
        Snapshot::new(
            FeatureCollection::from_definitions(definitions).into_definitions(),
            None,
            FetchStatus::Changed,
        )
    }

    /// Parse a feature definitions document.
    pub fn from_json(payload: &str, etag: Option<String>) -> Result<Snapshot> {
        let collection: FeatureCollection = serde_json::from_str(payload)?;
        let (features, segments) = collection.into_parts();
        Ok(Snapshot::new(features, etag, FetchStatus::Changed).with_segments(segments))
    }

    /// Serialize as a feature definitions document, features sorted by name and segments by id.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Document<'a> {
            version: u32,
            features: Vec<&'a FeatureDefinition>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            segments: Vec<&'a Segment>,
        }

        let mut features: Vec<_> = self.features.values().collect();
        features.sort_by(|a, b| a.name.cmp(&b.name));
        let mut segments: Vec<_> = self.segments.values().collect();
        segments.sort_by_key(|segment| segment.id);
        Ok(serde_json::to_string(&Document {
            version: 2,
            features,
            segments,
        })?)
    }

    /// Same definitions, different status. Shares the definitions with `self`.
    pub fn with_status(&self, status: FetchStatus) -> Snapshot {
        Snapshot {
            features: Arc::clone(&self.features),
            segments: Arc::clone(&self.segments),
            etag: self.etag.clone(),
            status,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureDefinition> {
        self.features.get(name)
    }

    pub fn segment(&self, id: u32) -> Option<&Segment> {
        self.segments.get(&id)
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn status(&self) -> FetchStatus {
        self.status
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::empty()
    }
}
