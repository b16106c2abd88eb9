//! HTTP relay of upstream playback traffic.
//!
//! Media segments go through [`SegmentRelay`], which decides per infohash
//! whether to pass bytes through or transcode them. Everything else under the
//! playback prefix (playlists, JSON control responses) goes through
//! [`ControlProxy`], which rewrites embedded upstream URLs so clients keep
//! talking to us.

pub mod manifest;
pub mod segment;

pub use manifest::{ControlProxy, ManifestRewriter, ProxyRequest};
pub use segment::SegmentRelay;

use crate::upstream::InfoHash;

/// True for paths naming an MPEG-TS media segment.
pub fn is_segment_path(rest_path: &str) -> bool {
    rest_path.ends_with(".ts")
}

/// Infohash embedded in a segment path.
///
/// Segment paths look like `<kind>/<infohash>/<n>.ts`; the infohash is the
/// component immediately before the file name. Paths without a parent
/// component carry no infohash.
pub fn segment_infohash(rest_path: &str) -> Option<InfoHash> {
    let mut components = rest_path
        .trim_matches('/')
        .rsplit('/')
        .filter(|c| !c.is_empty());
    let _file = components.next()?;
    components.next().and_then(InfoHash::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_detection() {
        assert!(is_segment_path("c/abc/12.ts"));
        assert!(!is_segment_path("r/abc/playlist.m3u8"));
        assert!(!is_segment_path("manifest.m3u8"));
    }

    #[test]
    fn test_infohash_is_parent_of_file() {
        assert_eq!(
            segment_infohash("c/0f3a9b/1771.ts").unwrap().as_str(),
            "0f3a9b"
        );
        assert_eq!(
            segment_infohash("/hls/x/0f3a9b/1771.ts").unwrap().as_str(),
            "0f3a9b"
        );
    }

    #[test]
    fn test_bare_segment_has_no_infohash() {
        assert!(segment_infohash("1771.ts").is_none());
        assert!(segment_infohash("").is_none());
    }
}
