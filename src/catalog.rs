//! Track catalog
//!
//! A [`SoundCatalog`] is a static, immutable list of [`TrackDefinition`]s.
//! The built-in catalog carries the six ambient sources the engine ships
//! with; custom catalogs can be deserialized from JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a track within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Create a track id.
    pub fn new(id: impl Into<String>) -> Self {
        TrackId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        TrackId(id.to_owned())
    }
}

/// Immutable definition of one ambient track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDefinition {
    /// Catalog-unique identifier.
    pub id: TrackId,
    /// Human-readable name for the display layer.
    pub display_name: String,
    /// Source URI, resolved by the loader (file path or URL of common
    /// decodable audio media; the codec is opaque to the engine).
    pub source: String,
    /// Default volume in `[0, 1]`, clamped on construction.
    pub default_volume: f32,
}

impl TrackDefinition {
    /// Create a definition; `default_volume` is clamped to `[0, 1]`.
    pub fn new(
        id: impl Into<TrackId>,
        display_name: impl Into<String>,
        source: impl Into<String>,
        default_volume: f32,
    ) -> Self {
        TrackDefinition {
            id: id.into(),
            display_name: display_name.into(),
            source: source.into(),
            default_volume: default_volume.clamp(0.0, 1.0),
        }
    }
}

/// Static, ordered collection of track definitions.
///
/// Insertion order is preserved and becomes the engine's track order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundCatalog {
    tracks: Vec<TrackDefinition>,
}

impl SoundCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        SoundCatalog::default()
    }

    /// The built-in ambient set.
    pub fn builtin() -> Self {
        let mut catalog = SoundCatalog::new();
        for (id, name, file, volume) in [
            ("rain", "Gentle Rain", "rain.mp3", 0.6),
            ("thunder", "Distant Thunder", "thunder.mp3", 0.4),
            ("stream", "Mountain Stream", "stream.mp3", 0.7),
            ("wind", "Soft Wind", "wind.mp3", 0.5),
            ("fireplace", "Fireplace", "fireplace.mp3", 0.6),
            ("waves", "Ocean Waves", "waves.mp3", 0.5),
        ] {
            catalog.push(TrackDefinition::new(
                id,
                name,
                format!("sounds/{file}"),
                volume,
            ));
        }
        catalog
    }

    /// Parse a catalog from a JSON array of definitions.
    ///
    /// Out-of-range default volumes are clamped, never rejected.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut catalog: SoundCatalog = serde_json::from_str(json)?;
        for track in &mut catalog.tracks {
            track.default_volume = track.default_volume.clamp(0.0, 1.0);
        }
        Ok(catalog)
    }

    /// Append a definition. A definition with a duplicate id replaces
    /// nothing and is ignored with a warning.
    pub fn push(&mut self, definition: TrackDefinition) {
        if self.get(&definition.id).is_some() {
            log::warn!("duplicate track id {} ignored", definition.id);
            return;
        }
        self.tracks.push(definition);
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &TrackId) -> Option<&TrackDefinition> {
        self.tracks.iter().find(|t| &t.id == id)
    }

    /// Iterate definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackDefinition> {
        self.tracks.iter()
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
