//! Merging speech and on-screen events into one ordered track.

use crate::event::{Source, SubtitleEvent};

/// Chronologically ordered, immutable list of events for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    events: Vec<SubtitleEvent>,
}

impl Track {
    pub fn events(&self) -> &[SubtitleEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events visible at time `t`, in track order.
    pub fn active_at(&self, t: f64) -> Vec<&SubtitleEvent> {
        self.events.iter().filter(|e| e.is_active_at(t)).collect()
    }

    /// Events from one source, in track order.
    pub fn from_source(&self, source: Source) -> impl Iterator<Item = &SubtitleEvent> {
        self.events.iter().filter(move |e| e.source() == source)
    }
}

/// Merge both event lists into a track.
///
/// Sorted by `(start, source, original index)`. Overlaps across sources are
/// kept as-is; nothing is deduplicated.
pub fn merge(speech: Vec<SubtitleEvent>, on_screen: Vec<SubtitleEvent>) -> Track {
    let mut events: Vec<SubtitleEvent> = speech.into_iter().chain(on_screen).collect();

    // `sort_by` is stable, which covers the original-index tie-break.
    events.sort_by(|a, b| {
        a.start()
            .total_cmp(&b.start())
            .then_with(|| a.source().cmp(&b.source()))
    });

    Track { events }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DEFAULT_ON_SCREEN_DURATION;

    fn speech(start: f64, end: f64, text: &str) -> SubtitleEvent {
        SubtitleEvent::speech(start, end, text).unwrap()
    }

    fn shown(at: f64, text: &str) -> SubtitleEvent {
        SubtitleEvent::on_screen(at, text, DEFAULT_ON_SCREEN_DURATION).unwrap()
    }

    #[test]
    fn keeps_every_event_in_start_order() {
        let a = vec![speech(0.0, 1.0, "a"), speech(2.0, 3.0, "b"), speech(5.0, 6.0, "c")];
        let b = vec![shown(0.5, "x"), shown(4.0, "y")];

        let track = merge(a, b);

        assert_eq!(track.len(), 5);
        let starts: Vec<f64> = track.events().iter().map(|e| e.start()).collect();
        assert_eq!(starts, vec![0.0, 0.5, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn speech_wins_ties() {
        let track = merge(vec![speech(1.0, 2.0, "said")], vec![shown(1.0, "shown")]);
        assert_eq!(track.events()[0].source(), Source::Speech);
        assert_eq!(track.events()[1].source(), Source::OnScreen);

        let track = merge(vec![], vec![shown(1.0, "first"), shown(1.0, "second")]);
        assert_eq!(track.events()[0].text(), "first");
        assert_eq!(track.events()[1].text(), "second");
    }

    #[test]
    fn overlaps_are_not_collapsed() {
        let track = merge(vec![speech(0.0, 2.5, "said")], vec![shown(1.0, "shown")]);
        let active: Vec<&str> = track.active_at(1.5).iter().map(|e| e.text()).collect();
        assert_eq!(active, vec!["said", "shown"]);
    }

    #[test]
    fn empty_inputs_give_empty_track() {
        let track = merge(vec![], vec![]);
        assert!(track.is_empty());
        assert!(track.active_at(0.0).is_empty());
    }

    #[test]
    fn filters_by_source() {
        let track = merge(vec![speech(0.0, 1.0, "a")], vec![shown(0.5, "x"), shown(3.0, "y")]);
        assert_eq!(track.from_source(Source::OnScreen).count(), 2);
        assert_eq!(track.from_source(Source::Speech).count(), 1);
    }
}
