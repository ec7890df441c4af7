//! Clés de métadonnées DIDL-Lite
//!
//! L'ensemble des clés est fermé : chaque clé correspond à une propriété
//! `dc:` ou `upnp:` du profil DIDL-Lite.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Clé de métadonnée d'un objet CDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKey {
    Title,
    Artist,
    Album,
    Date,
    Genre,
    Description,
    LongDescription,
    TrackNumber,
    AlbumArtUri,
    Region,
    Author,
    Director,
    Publisher,
    Rating,
    Actor,
    Producer,
    AlbumArtist,
}

impl MetadataKey {
    /// Nom de la propriété DIDL-Lite correspondante.
    pub fn didl_name(&self) -> &'static str {
        match self {
            MetadataKey::Title => "dc:title",
            MetadataKey::Artist => "upnp:artist",
            MetadataKey::Album => "upnp:album",
            MetadataKey::Date => "dc:date",
            MetadataKey::Genre => "upnp:genre",
            MetadataKey::Description => "dc:description",
            MetadataKey::LongDescription => "upnp:longDescription",
            MetadataKey::TrackNumber => "upnp:originalTrackNumber",
            MetadataKey::AlbumArtUri => "upnp:albumArtURI",
            MetadataKey::Region => "upnp:region",
            MetadataKey::Author => "upnp:author",
            MetadataKey::Director => "upnp:director",
            MetadataKey::Publisher => "dc:publisher",
            MetadataKey::Rating => "upnp:rating",
            MetadataKey::Actor => "upnp:actor",
            MetadataKey::Producer => "upnp:producer",
            MetadataKey::AlbumArtist => "upnp:albumArtist",
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.didl_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn didl_names() {
        assert_eq!(MetadataKey::Title.to_string(), "dc:title");
        assert_eq!(MetadataKey::AlbumArtist.didl_name(), "upnp:albumArtist");
    }
}
