mod common;
use common::*;

use tumorscan::DiagnosisRecord;
use tumorscan::report::{save_csv, write_csv};

fn diagnosis(score: f32) -> Diagnosis {
    tumorscan::decide(score, 0.5).expect("valid score")
}

#[test]
fn test_record_from_diagnosis() {
    let record = DiagnosisRecord::new("scans/case_01.png", &diagnosis(0.95));
    assert_eq!(record.image_name, "case_01.png");
    assert_eq!(record.label, Label::Positive);
    assert_eq!(record.confidence_level, ConfidenceLevel::VeryHigh);
    assert_eq!(record.threshold, 0.5);
}

#[test]
fn test_csv_has_header_and_one_row_per_image() -> anyhow::Result<()> {
    let records = vec![
        DiagnosisRecord::new("a/tumor.png", &diagnosis(0.95)),
        DiagnosisRecord::new("a/clear.png", &diagnosis(0.2)),
    ];

    let mut buf = Vec::new();
    write_csv(&mut buf, &records)?;
    let text = String::from_utf8(buf)?;
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "image_name,image_path,label,score,confidence,confidence_level,threshold"
    );
    assert!(lines[1].starts_with("tumor.png,"));
    assert!(lines[1].contains(",positive,"));
    assert!(lines[1].contains(",very_high,"));
    assert!(lines[2].starts_with("clear.png,"));
    assert!(lines[2].contains(",negative,"));
    Ok(())
}

#[test]
fn test_save_csv_writes_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("results.csv");
    save_csv(&path, &[DiagnosisRecord::new("x.jpg", &diagnosis(0.6))])?;

    let text = std::fs::read_to_string(&path)?;
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("x.jpg"));
    Ok(())
}

#[test]
fn test_save_csv_reports_io_errors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing").join("results.csv");
    let result = save_csv(&path, &[]);
    assert!(matches!(result, Err(PipelineError::Io { .. })));
    Ok(())
}
