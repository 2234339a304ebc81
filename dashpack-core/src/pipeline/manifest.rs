use std::sync::OnceLock;

use regex::Regex;

use super::types::AdaptationSetSummary;

fn adaptation_set_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)<AdaptationSet\b([^>]*)>(.*?)</AdaptationSet>").ok())
        .as_ref()
}

fn representation_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<Representation\b([^>]*)>?").ok())
        .as_ref()
}

fn id_attribute_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?:^|\s)id\s*=\s*"([^"]*)""#).ok())
        .as_ref()
}

fn content_type_attribute_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?:^|\s)contentType\s*=\s*"([^"]*)""#).ok())
        .as_ref()
}

fn attribute(attributes: &str, pattern: Option<&Regex>) -> Option<String> {
    pattern?
        .captures(attributes)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
}

/// Structural view of a DASH manifest, enough to check what the packager wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSummary {
    pub adaptation_sets: Vec<AdaptationSetSummary>,
}

impl ManifestSummary {
    pub fn parse(contents: &str) -> Self {
        let (Some(sets), Some(reps)) = (adaptation_set_pattern(), representation_pattern()) else {
            return Self::default();
        };
        let adaptation_sets = sets
            .captures_iter(contents)
            .map(|captures| {
                let attributes = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let body = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
                let representations = reps
                    .captures_iter(body)
                    .filter_map(|rep| rep.get(1).and_then(|attrs| attribute(attrs.as_str(), id_attribute_pattern())))
                    .collect();
                AdaptationSetSummary {
                    id: attribute(attributes, id_attribute_pattern()),
                    content_type: attribute(attributes, content_type_attribute_pattern()),
                    representations,
                }
            })
            .collect();
        Self { adaptation_sets }
    }

    pub fn representation_count(&self) -> usize {
        self.adaptation_sets
            .iter()
            .map(|set| set.representations.len())
            .sum()
    }

    /// Expects one video set and one audio set, each carrying its rungs.
    pub fn check(&self, video: usize, audio: usize) -> Result<(), String> {
        if self.adaptation_sets.len() != 2 {
            return Err(format!(
                "expected 2 adaptation sets, found {}",
                self.adaptation_sets.len()
            ));
        }
        let counts = [
            self.adaptation_sets[0].representations.len(),
            self.adaptation_sets[1].representations.len(),
        ];
        if counts != [video, audio] {
            return Err(format!(
                "expected {video}+{audio} representations, found {}+{}",
                counts[0], counts[1]
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <Period id="0" start="PT0.0S">
    <AdaptationSet id="0" contentType="video" segmentAlignment="true">
      <Representation id="0" mimeType="video/mp4" width="426" height="240">
        <SegmentTemplate media="chunk-$RepresentationID$-$Number%05d$.m4s"/>
      </Representation>
      <Representation id="1" mimeType="video/mp4" width="854" height="480"/>
    </AdaptationSet>
    <AdaptationSet id="1" contentType="audio">
      <Representation id="2" mimeType="audio/mp4" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_sets_and_representations() {
        let summary = ManifestSummary::parse(SAMPLE);
        assert_eq!(summary.adaptation_sets.len(), 2);
        let video = &summary.adaptation_sets[0];
        assert_eq!(video.id.as_deref(), Some("0"));
        assert_eq!(video.content_type.as_deref(), Some("video"));
        assert_eq!(video.representations, vec!["0", "1"]);
        assert_eq!(summary.adaptation_sets[1].representations, vec!["2"]);
        assert_eq!(summary.representation_count(), 3);
        assert!(summary.check(2, 1).is_ok());
    }

    #[test]
    fn check_rejects_wrong_shape() {
        let summary = ManifestSummary::parse(SAMPLE);
        assert!(summary.check(4, 1).is_err());

        let single = ManifestSummary::parse(
            r#"<MPD><AdaptationSet id="0"><Representation id="0"/></AdaptationSet></MPD>"#,
        );
        let reason = single.check(1, 0).unwrap_err();
        assert!(reason.contains("found 1"));

        assert!(ManifestSummary::parse("not xml at all").adaptation_sets.is_empty());
    }

    #[test]
    fn id_is_not_read_from_longer_attribute_names() {
        let summary = ManifestSummary::parse(
            r#"<MPD><AdaptationSet xid="9" id="0" contentType="video">
<Representation data-id="7" id="3"/>
</AdaptationSet></MPD>"#,
        );
        let set = &summary.adaptation_sets[0];
        assert_eq!(set.id.as_deref(), Some("0"));
        assert_eq!(set.content_type.as_deref(), Some("video"));
        assert_eq!(set.representations, vec!["3"]);
    }
}
