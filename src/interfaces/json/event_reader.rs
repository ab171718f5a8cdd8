use crate::domain::event::GatewayEvent;
use crate::error::Result;
use std::io::{self, BufRead};

/// Reads trusted gateway events from a JSON Lines source, one event per line.
///
/// Blank lines are skipped. A malformed line yields an `Err` item without
/// ending the stream, so callers can log it and carry on.
pub struct EventReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses events, pairing each with its 1-based line number.
    pub fn events(self) -> impl Iterator<Item = (usize, Result<GatewayEvent>)> {
        self.source
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line))
            .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
            .map(|(number, line)| (number, parse(line)))
    }
}

fn parse(line: io::Result<String>) -> Result<GatewayEvent> {
    let text = line?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventKind;

    #[test]
    fn test_reader_valid_stream() {
        let data = concat!(
            r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#,
            "\n\n",
            r#"{"id":"evt_2","type":"refund.updated","data":{"object":{"id":"re_1"}}}"#,
            "\n",
        );
        let events: Vec<_> = EventReader::new(data.as_bytes()).events().collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 1);
        assert_eq!(events[1].0, 3);
        let first = events[0].1.as_ref().unwrap();
        assert_eq!(first.kind(), Some(EventKind::IntentSucceeded));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "{not json}\n{\"type\":\"refund.updated\",\"data\":{\"object\":{}}}\n";
        let events: Vec<_> = EventReader::new(data.as_bytes()).events().collect();

        assert!(events[0].1.is_err());
        assert!(events[1].1.is_ok());
    }
}
