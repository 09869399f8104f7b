//! Clipboard record model
//!
//! The engine only needs indexed access to each record's URI. [`RecordSet`]
//! is the seam to whatever clipboard data model the host uses; [`PasteData`]
//! is a plain in-memory implementation.

/// Mutable, index-addressed view of pasted records
pub trait RecordSet {
    /// Number of records currently in the set
    fn record_count(&self) -> usize;

    /// URI of record `index` (0-based), if it carries one
    fn uri_at(&self, index: usize) -> Option<String>;

    /// Replace the URI of record `index`
    fn set_uri(&mut self, index: usize, uri: String);

    /// Remove record `index`, shifting later records down
    fn remove_at(&mut self, index: usize);
}

/// One pasted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteRecord {
    /// MIME type of the record
    pub mime_type: String,
    /// File URI for file-reference records
    pub uri: Option<String>,
    /// Inline text payload
    pub text: Option<String>,
}

impl PasteRecord {
    /// File-reference record
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            mime_type: "text/uri-list".to_string(),
            uri: Some(uri.into()),
            text: None,
        }
    }

    /// Plain text record
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mime_type: "text/plain".to_string(),
            uri: None,
            text: Some(text.into()),
        }
    }
}

/// In-memory record set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteData {
    /// Records in paste order
    pub records: Vec<PasteRecord>,
}

impl PasteData {
    /// Wrap `records`
    pub fn new(records: Vec<PasteRecord>) -> Self {
        Self { records }
    }

    /// URIs of all file-reference records, in order
    pub fn uris(&self) -> Vec<&str> {
        self.records.iter().filter_map(|r| r.uri.as_deref()).collect()
    }
}

impl RecordSet for PasteData {
    fn record_count(&self) -> usize {
        self.records.len()
    }

    fn uri_at(&self, index: usize) -> Option<String> {
        self.records.get(index).and_then(|r| r.uri.clone())
    }

    fn set_uri(&mut self, index: usize, uri: String) {
        if let Some(record) = self.records.get_mut(index) {
            record.uri = Some(uri);
        }
    }

    fn remove_at(&mut self, index: usize) {
        if index < self.records.len() {
            self.records.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paste_data_access() {
        let mut data = PasteData::new(vec![
            PasteRecord::uri("file://docs/a.txt"),
            PasteRecord::text("hello"),
        ]);

        assert_eq!(data.record_count(), 2);
        assert_eq!(data.uri_at(0).as_deref(), Some("file://docs/a.txt"));
        assert_eq!(data.uri_at(1), None);
        assert_eq!(data.uri_at(5), None);

        data.set_uri(0, "file://docs/b.txt".into());
        assert_eq!(data.uris(), vec!["file://docs/b.txt"]);
    }

    #[test]
    fn test_remove_out_of_range_is_ignored() {
        let mut data = PasteData::new(vec![PasteRecord::text("x")]);
        data.remove_at(3);
        assert_eq!(data.record_count(), 1);
        data.remove_at(0);
        assert_eq!(data.record_count(), 0);
    }
}
