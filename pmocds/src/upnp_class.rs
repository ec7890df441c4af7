//! Constantes de classes UPnP (DIDL-Lite).

pub const CONTAINER: &str = "object.container";
pub const ITEM: &str = "object.item";

pub const AUDIO_ITEM: &str = "object.item.audioItem";
pub const MUSIC_TRACK: &str = "object.item.audioItem.musicTrack";
pub const AUDIO_BROADCAST: &str = "object.item.audioItem.audioBroadcast";

pub const VIDEO_ITEM: &str = "object.item.videoItem";
pub const VIDEO_BROADCAST: &str = "object.item.videoItem.videoBroadcast";

pub const IMAGE_ITEM: &str = "object.item.imageItem";
pub const PHOTO: &str = "object.item.imageItem.photo";

pub const MUSIC_ALBUM: &str = "object.container.album.musicAlbum";
pub const MUSIC_ARTIST: &str = "object.container.person.musicArtist";
pub const MUSIC_GENRE: &str = "object.container.genre.musicGenre";
pub const PLAYLIST_CONTAINER: &str = "object.container.playlistContainer";

/// Teste l'appartenance d'une classe à une classe de base UPnP.
///
/// `object.item.audioItem.musicTrack` est ainsi un `object.item.audioItem`
/// mais pas l'inverse.
pub fn is_subclass(class: &str, base: &str) -> bool {
    class == base || (class.starts_with(base) && class.as_bytes().get(base.len()) == Some(&b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclass_matching() {
        assert!(is_subclass(MUSIC_TRACK, AUDIO_ITEM));
        assert!(is_subclass(AUDIO_ITEM, AUDIO_ITEM));
        assert!(!is_subclass(AUDIO_ITEM, MUSIC_TRACK));
        assert!(!is_subclass("object.item.audioItemX", AUDIO_ITEM));
    }
}
