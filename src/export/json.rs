use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Export any serializable data structure to pretty JSON
pub fn export_json<T>(data: &T, output_path: &Path) -> Result<()>
where
    T: serde::Serialize + ?Sized,
{
    let json_data = serde_json::to_string_pretty(data)?;

    let mut file = std::fs::File::create(output_path)?;
    file.write_all(json_data.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{report_rows, DateRange, ReportRow};
    use crate::export::tests::sample_records;
    use tempfile::NamedTempFile;

    #[test]
    fn test_export_report_rows() {
        let rows = report_rows(&sample_records(), &DateRange::default());

        let temp_file = NamedTempFile::new().unwrap();
        export_json(&rows, temp_file.path()).unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("\"user_id\": \"export\""));
        assert!(content.contains("\"risk_level\": \"insufficient_data\""));

        let parsed: Vec<ReportRow> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, rows);
    }
}
