//! Ressources d'un objet CDS
//!
//! Chaque objet porte une séquence ordonnée de ressources ; la ressource
//! d'indice 0 est la ressource jouable principale. Une ressource associe
//! un handler (qui sait produire les octets) à des attributs DIDL
//! (`protocolInfo`, taille, durée...), des options et des paramètres.

use crate::Dictionary;
use serde::{Deserialize, Serialize};

/// Handler responsable de la production du contenu d'une ressource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceHandler {
    /// Lecture directe du fichier local.
    Default,
    /// Sortie d'un profil de transcodage.
    Transcode,
    /// URL externe servie telle quelle (ou via proxy).
    ExternalUrl,
    /// Pochette / fanart associé.
    FanArt,
    /// Image embarquée dans les tags id3.
    Id3,
    /// Vignette générée depuis la vidéo.
    Thumbnail,
}

/// Attribut DIDL d'une ressource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceAttribute {
    ProtocolInfo,
    Size,
    Duration,
    Bitrate,
    SampleFrequency,
    NrAudioChannels,
    Resolution,
    ColorDepth,
}

impl ResourceAttribute {
    pub fn didl_name(&self) -> &'static str {
        match self {
            ResourceAttribute::ProtocolInfo => "protocolInfo",
            ResourceAttribute::Size => "size",
            ResourceAttribute::Duration => "duration",
            ResourceAttribute::Bitrate => "bitrate",
            ResourceAttribute::SampleFrequency => "sampleFrequency",
            ResourceAttribute::NrAudioChannels => "nrAudioChannels",
            ResourceAttribute::Resolution => "resolution",
            ResourceAttribute::ColorDepth => "colorDepth",
        }
    }
}

/// Une ressource d'un objet CDS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub handler: ResourceHandler,
    pub attributes: Dictionary<ResourceAttribute>,
    pub options: Dictionary<String>,
    pub parameters: Dictionary<String>,
}

impl Default for ResourceHandler {
    fn default() -> Self {
        ResourceHandler::Default
    }
}

impl Resource {
    pub fn new(handler: ResourceHandler) -> Self {
        Self {
            handler,
            attributes: Dictionary::new(),
            options: Dictionary::new(),
            parameters: Dictionary::new(),
        }
    }

    pub fn attribute(&self, attr: ResourceAttribute) -> Option<&str> {
        self.attributes.get(&attr)
    }

    pub fn set_attribute(&mut self, attr: ResourceAttribute, value: impl Into<String>) {
        self.attributes.set(attr, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_roundtrip() {
        let mut res = Resource::new(ResourceHandler::Default);
        res.set_attribute(ResourceAttribute::Size, "1024");
        res.set_attribute(ResourceAttribute::ProtocolInfo, "http-get:*:audio/mpeg:*");
        assert_eq!(res.attribute(ResourceAttribute::Size), Some("1024"));
        assert_eq!(res.attribute(ResourceAttribute::Duration), None);
    }
}
