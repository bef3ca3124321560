use crate::error::{TableDataError, TableDataResult};
use crate::record::Record;

/// Parse a record-array payload.
///
/// An empty string and `[]` both mean "no records". Record versions must be
/// positive and strictly increasing.
pub fn parse_payload(payload: &str) -> TableDataResult<Vec<Record>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    let records: Vec<Record> = serde_json::from_str(trimmed)
        .map_err(|e| TableDataError::MalformedPayload(e.to_string()))?;
    validate_versions(&records)?;
    Ok(records)
}

/// Check that versions start above zero and strictly increase.
pub fn validate_versions(records: &[Record]) -> TableDataResult<()> {
    let mut previous = 0u64;
    for (index, record) in records.iter().enumerate() {
        if record.version <= previous {
            return Err(TableDataError::MalformedPayload(format!(
                "record {index} has version {} after version {previous}; versions must be positive and strictly increasing",
                record.version
            )));
        }
        previous = record.version;
    }
    Ok(())
}

/// Encode records as an indented JSON array.
pub fn encode_payload(records: &[Record]) -> TableDataResult<String> {
    serde_json::to_string_pretty(records).map_err(|e| TableDataError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payloads() {
        assert!(parse_payload("").unwrap().is_empty());
        assert!(parse_payload("[]").unwrap().is_empty());
        assert!(parse_payload("  [] \n").unwrap().is_empty());
    }

    #[test]
    fn parses_camel_case_records() {
        let payload = r#"[{"version":1,"hash":"abc","magnetLink":"magnet:?xt=1",
            "fileName":"a.bin","fileSize":42,"description":"first",
            "createdAt":"2024-01-01T00:00:00Z"}]"#;
        let records = parse_payload(payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, 1);
        assert_eq!(records[0].file_name, "a.bin");
        assert_eq!(records[0].file_size, 42);
    }

    #[test]
    fn missing_fields_default() {
        let records = parse_payload(r#"[{"version":3,"hash":"abc"}]"#).unwrap();
        assert_eq!(records[0].version, 3);
        assert_eq!(records[0].hash, "abc");
        assert!(records[0].magnet_link.is_empty());
        assert_eq!(records[0].file_size, 0);
    }

    #[test]
    fn gaps_between_versions_are_allowed() {
        let records = parse_payload(r#"[{"version":2,"hash":"a"},{"version":7,"hash":"b"}]"#)
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unordered_versions_are_malformed() {
        for payload in [
            r#"[{"version":5,"hash":"a"},{"version":2,"hash":"b"}]"#,
            r#"[{"version":2,"hash":"a"},{"version":2,"hash":"b"}]"#,
            r#"[{"version":0,"hash":"a"}]"#,
            r#"[{"hash":"a"}]"#,
        ] {
            assert!(
                matches!(parse_payload(payload), Err(TableDataError::MalformedPayload(_))),
                "{payload}"
            );
        }
    }

    #[test]
    fn non_array_is_malformed() {
        assert!(matches!(
            parse_payload(r#"{"hash":"abc"}"#),
            Err(TableDataError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_payload("not json"),
            Err(TableDataError::MalformedPayload(_))
        ));
    }

    #[test]
    fn encode_then_parse() {
        let records = parse_payload(r#"[{"version":1,"hash":"a"},{"version":2,"hash":"b"}]"#)
            .unwrap();
        let encoded = encode_payload(&records).unwrap();
        assert!(encoded.contains('\n'));
        assert_eq!(parse_payload(&encoded).unwrap(), records);
    }
}
