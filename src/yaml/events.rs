/// Parser event stream. The scanner turns text into these; the composer
/// folds them into values. Anchors ride on the event that produced the
/// anchored node.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StreamStart,
    StreamEnd,
    DocumentStart,
    DocumentEnd,
    Scalar {
        value: String,
        anchor: Option<String>,
        quoted: bool,
    },
    SequenceStart {
        anchor: Option<String>,
    },
    SequenceEnd,
    MappingStart {
        anchor: Option<String>,
    },
    MappingEnd,
    Alias {
        name: String,
    },
}

impl Event {
    pub fn plain(value: impl Into<String>) -> Event {
        Event::Scalar {
            value: value.into(),
            anchor: None,
            quoted: false,
        }
    }
}
