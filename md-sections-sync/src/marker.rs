use crate::tracker::{Claim, Tracker};
use crate::{AdapterError, EditorAdapter, LoadStatus, Surface};
use md_sections_core::{ChangeSet, IdConfirmations};
use md_sections_doc::{DocumentView, Marker, annotate, extract_segments, strip_markers};
use tracing::debug;

/// Adapter for a flat-text surface.
///
/// Every block's text sits below an identity marker line. A poll pairs
/// markers with the text that follows them; text with no marker, or with a
/// marker the baseline does not know, is new.
#[derive(Debug, Default)]
pub struct MarkerAdapter {
    text: String,
    tracker: Tracker,
}

impl MarkerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw surface text, markers included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the raw surface text, as typing would.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// What copying the whole surface to the clipboard yields.
    pub fn copy_all(&self) -> String {
        strip_markers(&self.text)
    }
}

impl EditorAdapter for MarkerAdapter {
    fn surface(&self) -> Surface {
        Surface::Marker
    }

    fn get_change_set(&mut self) -> ChangeSet {
        let segments = extract_segments(&self.text);
        let claimed: Vec<Marker> = segments
            .iter()
            .filter(|segment| !segment.text.trim().is_empty())
            .filter_map(|segment| segment.marker.clone())
            .collect();
        let stretches = segments.into_iter().map(|segment| {
            let claim = match segment.marker {
                Some(Marker::Block(id)) => Claim::Known(id),
                Some(Marker::Temp(temp)) => Claim::Temp(temp),
                Some(Marker::Unrecognized(_)) | None => Claim::Fresh,
            };
            (claim, segment.text)
        });
        let (changes, units) = self.tracker.diff(stretches);

        let keys: Vec<Marker> = units.iter().map(|unit| Marker::from(unit.key)).collect();
        if keys != claimed {
            // New or split text needs markers of its own.
            self.text = annotate(
                units
                    .iter()
                    .map(|unit| (Marker::from(unit.key), unit.markdown.as_str())),
            );
            debug!(units = units.len(), "re-marked surface text");
        }
        changes
    }

    fn confirm_ids(&mut self, confirmations: &IdConfirmations) {
        self.tracker.confirm(confirmations);
        if confirmations.is_empty() {
            return;
        }
        self.text = self
            .text
            .lines()
            .map(|line| match Marker::parse_line(line) {
                Some(Marker::Temp(temp)) => match confirmations.get(&temp) {
                    Some(id) => Marker::Block(*id).to_string(),
                    None => line.to_string(),
                },
                _ => line.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
    }

    fn load_with_ids(&mut self, view: &DocumentView) -> Result<LoadStatus, AdapterError> {
        self.tracker.load(view);
        self.text = view.annotated().to_string();
        debug!(units = self.tracker.baseline_len(), "marker surface loaded");
        Ok(LoadStatus::Applied)
    }

    fn content(&self) -> String {
        strip_markers(&self.text)
    }
}
