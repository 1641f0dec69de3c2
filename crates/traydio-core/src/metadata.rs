use serde::{Deserialize, Serialize};

/// Maximum title/artist length shown in the status menu; longer strings are
/// cut to [`DISPLAY_KEEP_CHARS`] characters plus an ellipsis.
pub const DISPLAY_MAX_CHARS: usize = 35;
const DISPLAY_KEEP_CHARS: usize = 32;

/// The fixed set of stream tags the tracker recognizes.  Backends map their
/// native tag vocabulary onto these fields and drop everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagSet {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub image: Option<String>,
    /// Bits per second.
    pub bitrate: Option<u32>,
}

impl TagSet {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.image.is_none()
            && self.bitrate.is_none()
    }
}

/// Now-playing snapshot for one playback session.  Fields fill in as tags
/// arrive and are never cleared within a session; see [`Metadata::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_art: Option<String>,
    /// Bits per second.
    pub bitrate: Option<u32>,
}

impl Metadata {
    /// Merge a tag update into the snapshot.  A field is only overwritten by
    /// a newer non-empty value; an update carrying an empty or missing field
    /// never erases what is already known.  Returns true when anything
    /// changed, so callers can skip redundant re-renders.
    pub fn merge(&mut self, tags: &TagSet) -> bool {
        let mut changed = false;
        changed |= merge_text(&mut self.title, tags.title.as_deref());
        changed |= merge_text(&mut self.artist, tags.artist.as_deref());
        changed |= merge_text(&mut self.album_art, tags.image.as_deref());
        if let Some(bitrate) = tags.bitrate {
            if bitrate > 0 && self.bitrate != Some(bitrate) {
                self.bitrate = Some(bitrate);
                changed = true;
            }
        }
        changed
    }

    /// `"128 kbps"`-style label.  None when the bitrate is unknown or zero
    /// so the quality indicator stays hidden instead of showing "0 kbps".
    pub fn quality_label(&self) -> Option<String> {
        let bitrate = self.bitrate.filter(|&b| b > 0)?;
        let kbps = (f64::from(bitrate) / 1000.0).round() as u32;
        Some(format!("{kbps} kbps"))
    }
}

fn merge_text(current: &mut Option<String>, update: Option<&str>) -> bool {
    match update {
        Some(value) if !value.trim().is_empty() && current.as_deref() != Some(value) => {
            *current = Some(value.to_string());
            true
        }
        _ => false,
    }
}

/// Truncate a title/artist string for menu display.  Char-based so multibyte
/// text cannot be split mid-character.
pub fn truncate_for_display(text: &str) -> String {
    if text.chars().count() > DISPLAY_MAX_CHARS {
        let kept: String = text.chars().take(DISPLAY_KEEP_CHARS).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(title: Option<&str>, artist: Option<&str>) -> TagSet {
        TagSet {
            title: title.map(String::from),
            artist: artist.map(String::from),
            ..TagSet::default()
        }
    }

    #[test]
    fn merge_is_monotonic_within_a_session() {
        let mut meta = Metadata::default();
        assert!(meta.merge(&tags(Some("Take Five"), Some("Dave Brubeck"))));

        // An update with no artist must not erase the known artist.
        assert!(!meta.merge(&tags(None, None)));
        assert_eq!(meta.artist.as_deref(), Some("Dave Brubeck"));

        // Neither must an empty-string artist.
        assert!(!meta.merge(&tags(None, Some("   "))));
        assert_eq!(meta.artist.as_deref(), Some("Dave Brubeck"));

        // A later non-empty value replaces it.
        assert!(meta.merge(&tags(None, Some("Paul Desmond"))));
        assert_eq!(meta.artist.as_deref(), Some("Paul Desmond"));
    }

    #[test]
    fn merge_reports_unchanged_for_repeated_tags() {
        let mut meta = Metadata::default();
        let update = tags(Some("Take Five"), Some("Dave Brubeck"));
        assert!(meta.merge(&update));
        assert!(!meta.merge(&update));
    }

    #[test]
    fn zero_bitrate_is_ignored() {
        let mut meta = Metadata::default();
        assert!(!meta.merge(&TagSet {
            bitrate: Some(0),
            ..TagSet::default()
        }));
        assert_eq!(meta.quality_label(), None);

        assert!(meta.merge(&TagSet {
            bitrate: Some(128_000),
            ..TagSet::default()
        }));
        assert_eq!(meta.quality_label().as_deref(), Some("128 kbps"));
    }

    #[test]
    fn quality_label_hidden_when_bitrate_never_arrives() {
        let mut meta = Metadata::default();
        meta.merge(&tags(Some("Song"), Some("Artist")));
        assert_eq!(meta.quality_label(), None);
    }

    #[test]
    fn truncation_keeps_short_strings_intact() {
        let exactly_35 = "a".repeat(35);
        assert_eq!(truncate_for_display(&exactly_35), exactly_35);
    }

    #[test]
    fn truncation_cuts_long_strings_with_ellipsis() {
        let long = "b".repeat(40);
        let shown = truncate_for_display(&long);
        assert_eq!(shown, format!("{}...", "b".repeat(32)));
        assert_eq!(shown.chars().count(), 35);
    }

    #[test]
    fn truncation_is_char_safe() {
        let long: String = "ü".repeat(40);
        let shown = truncate_for_display(&long);
        assert_eq!(shown, format!("{}...", "ü".repeat(32)));
    }
}
