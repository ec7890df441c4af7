//! Analyse des playlists
//!
//! Quand un item importé a le content type `playlist`, il est remis au
//! collaborateur d'analyse qui en fait des items virtuels. L'analyse
//! elle-même (m3u, pls, scripts) est un greffon externe.

use crate::error::Result;
use crate::task::Task;
use pmocds::CdsObject;

/// Content type interne désignant une playlist.
pub const CONTENT_TYPE_PLAYLIST: &str = "playlist";

/// Collaborateur d'analyse des playlists.
pub trait PlaylistParser: Send + Sync {
    /// Transforme l'item playlist en objets virtuels.
    fn process_playlist_object(&self, obj: &CdsObject, task: Option<&Task>) -> Result<()>;
}
