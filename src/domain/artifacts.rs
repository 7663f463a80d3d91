//! Artifact sets and the files they are made of.

use std::str::FromStr;

use super::sanitize::sanitize;

/// One file within an artifact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// The submitted Markdown.
    Source,
    /// The synchronously converted mind map.
    Html,
    /// The asynchronous browser snapshot of the HTML.
    Png,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Source, ArtifactKind::Html, ArtifactKind::Png];

    /// File extension, also used as the `file_type` segment in URLs.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Source => "md",
            ArtifactKind::Html => "html",
            ArtifactKind::Png => "png",
        }
    }

    pub fn file_name(&self, base_name: &str) -> String {
        format!("{base_name}.{}", self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownArtifactKind(pub String);

impl FromStr for ArtifactKind {
    type Err = UnknownArtifactKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ArtifactKind::ALL
            .into_iter()
            .find(|kind| kind.extension() == value)
            .ok_or_else(|| UnknownArtifactKind(value.to_string()))
    }
}

/// Base name for a new artifact set: `{label}_{timestamp}`, or the bare
/// timestamp when no usable label was given.
pub fn base_name(label: Option<&str>, timestamp: i64) -> String {
    match label.filter(|value| !value.trim().is_empty()) {
        Some(value) => format!("{}_{timestamp}", sanitize(value)),
        None => timestamp.to_string(),
    }
}

/// Candidate names tried when `base` is already taken: `base`, `base-1`, ...
pub fn base_name_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1..).map(move |n| format!("{base}-{n}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_base_name() {
        assert_eq!(base_name(Some("demo"), 1_700_000_000), "demo_1700000000");
        assert_eq!(base_name(Some("a b"), 5), "a_b_5");
    }

    #[test]
    fn unlabelled_base_name_is_timestamp() {
        assert_eq!(base_name(None, 42), "42");
        assert_eq!(base_name(Some("  "), 42), "42");
    }

    #[test]
    fn kinds_round_trip_through_extension() {
        for kind in ArtifactKind::ALL {
            assert_eq!(kind.extension().parse::<ArtifactKind>(), Ok(kind));
        }
        assert!("exe".parse::<ArtifactKind>().is_err());
        assert_eq!(ArtifactKind::Html.file_name("demo_1"), "demo_1.html");
    }

    #[test]
    fn candidates_add_numeric_suffixes() {
        let names: Vec<_> = base_name_candidates("demo_1").take(3).collect();
        assert_eq!(names, ["demo_1", "demo_1-1", "demo_1-2"]);
    }
}
