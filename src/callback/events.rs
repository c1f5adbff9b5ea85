use serde::Deserialize;

use crate::results::{ResultRow, UNKNOWN_ROW};

const COMPLETED: &str = "COMPLETED";

/// Inbound callback parsed from a request body.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackEvent {
    /// A batch of result rows for a still-running job.
    Batch(ResultRow),
    /// The job has no more rows to report.
    Finished,
    /// Any other status update (e.g. `RUNNING`, `ERROR`).
    Status(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackPayload {
    status: String,
    test_csv_row: Option<i64>,
    presentation_number: Option<i64>,
    responses: Option<Vec<String>>,
}

impl CallbackEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let payload: CallbackPayload = serde_json::from_slice(payload)?;

        if payload.status != COMPLETED {
            return Ok(CallbackEvent::Status(payload.status));
        }

        Ok(match payload.responses {
            Some(responses) => {
                let test_row_id = payload
                    .test_csv_row
                    .or(payload.presentation_number)
                    .unwrap_or(UNKNOWN_ROW);
                CallbackEvent::Batch(ResultRow::new(test_row_id, responses))
            }
            None => CallbackEvent::Finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch() {
        let body = br#"{"status":"COMPLETED","testCsvRow":4,"responses":["alert","Hello"]}"#;
        assert_eq!(
            CallbackEvent::parse(body).unwrap(),
            CallbackEvent::Batch(ResultRow::new(4, vec!["alert".into(), "Hello".into()]))
        );
    }

    #[test]
    fn test_row_id_falls_back_to_presentation_number() {
        let body = br#"{"status":"COMPLETED","presentationNumber":7,"responses":[]}"#;
        assert_eq!(
            CallbackEvent::parse(body).unwrap(),
            CallbackEvent::Batch(ResultRow::new(7, vec![]))
        );
    }

    #[test]
    fn test_row_id_defaults_to_unknown() {
        let body = br#"{"status":"COMPLETED","responses":["x"]}"#;
        assert_eq!(
            CallbackEvent::parse(body).unwrap(),
            CallbackEvent::Batch(ResultRow::new(UNKNOWN_ROW, vec!["x".into()]))
        );
    }

    #[test]
    fn test_csv_row_wins_over_presentation_number() {
        let body =
            br#"{"status":"COMPLETED","testCsvRow":2,"presentationNumber":9,"responses":["x"]}"#;
        match CallbackEvent::parse(body).unwrap() {
            CallbackEvent::Batch(row) => assert_eq!(row.test_row_id, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_terminal() {
        let body = br#"{"status":"COMPLETED"}"#;
        assert_eq!(CallbackEvent::parse(body).unwrap(), CallbackEvent::Finished);
    }

    #[test]
    fn test_parse_other_status() {
        let body = br#"{"status":"RUNNING","responses":["ignored"]}"#;
        assert_eq!(
            CallbackEvent::parse(body).unwrap(),
            CallbackEvent::Status("RUNNING".into())
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(CallbackEvent::parse(b"not json").is_err());
        assert!(CallbackEvent::parse(br#"{"responses":["x"]}"#).is_err());
    }
}
