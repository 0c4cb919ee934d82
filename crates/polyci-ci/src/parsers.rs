//! Report parsers.
//!
//! Each tool's report is reduced to a [`Contribution`]: test counts,
//! coverage lines or finding counts. XML reports are streamed with
//! `quick_xml` and only the few elements that carry the summary are read;
//! JSON reports are deserialized into minimal serde views.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polyci_core::{metric, FindingCounts, Stage, StageResult, TestTotals};

/// Failure to turn a report into counts.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("report {0} was not produced")]
    Missing(PathBuf),

    #[error("failed to read report {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {format} report {path}: {detail}")]
    Malformed {
        format: ReportFormat,
        path: PathBuf,
        detail: String,
    },

    #[error("no parser for {path} in stage {stage}")]
    Unsupported { stage: Stage, path: PathBuf },
}

/// Line coverage from one report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverageSample {
    Lines { covered: u64, valid: u64 },
    /// Report only carried a rate.
    Percent(f64),
}

/// What one report adds to the aggregated record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contribution {
    /// Parsed test counts. `total` is the total the tool reported.
    pub tests: Option<TestTotals>,
    pub coverage: Option<CoverageSample>,
    pub findings: Option<FindingCounts>,
}

impl Contribution {
    pub fn tests(totals: TestTotals) -> Self {
        Self {
            tests: Some(totals),
            ..Default::default()
        }
    }

    pub fn coverage(sample: CoverageSample) -> Self {
        Self {
            coverage: Some(sample),
            ..Default::default()
        }
    }

    pub fn findings(total: u32, critical: u32) -> Self {
        Self {
            findings: Some(FindingCounts::new(total, critical)),
            ..Default::default()
        }
    }

    /// Pre-parsed data carried in a result's metrics, if any.
    pub fn from_metrics(result: &StageResult) -> Option<Self> {
        let get = |key| result.metric(key);
        let count = |key| get(key).map(|v: f64| v.max(0.0) as u64);

        let tests = match (
            count(metric::TESTS_PASSED),
            count(metric::TESTS_FAILED),
            count(metric::TESTS_SKIPPED),
        ) {
            (None, None, None) if count(metric::TESTS_TOTAL).is_none() => None,
            (passed, failed, skipped) => {
                let passed = passed.unwrap_or(0);
                let failed = failed.unwrap_or(0);
                let skipped = skipped.unwrap_or(0);
                Some(TestTotals {
                    total: count(metric::TESTS_TOTAL).unwrap_or(passed + failed + skipped),
                    passed,
                    failed,
                    skipped,
                })
            }
        };

        let coverage = match (
            count(metric::COVERAGE_LINES_COVERED),
            count(metric::COVERAGE_LINES_VALID),
            get(metric::COVERAGE_PERCENT),
        ) {
            (Some(covered), Some(valid), _) => Some(CoverageSample::Lines { covered, valid }),
            (_, _, Some(percent)) => Some(CoverageSample::Percent(percent)),
            _ => None,
        };

        let findings = match (
            count(metric::FINDINGS_TOTAL),
            count(metric::FINDINGS_CRITICAL),
        ) {
            (None, None) => None,
            (total, critical) => {
                let critical = critical.unwrap_or(0);
                let total = total.unwrap_or(critical).max(critical);
                Some(FindingCounts::new(saturate(total), saturate(critical)))
            }
        };

        let contribution = Self {
            tests,
            coverage,
            findings,
        };
        (contribution != Self::default()).then_some(contribution)
    }
}

/// Report formats understood by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Trx,
    JunitXml,
    Cobertura,
    Jacoco,
    DependencyCheck,
    Semgrep,
    Trivy,
    Gitleaks,
    Fossa,
    DotnetFormat,
    Checkstyle,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportFormat::Trx => "TRX",
            ReportFormat::JunitXml => "JUnit XML",
            ReportFormat::Cobertura => "Cobertura",
            ReportFormat::Jacoco => "JaCoCo",
            ReportFormat::DependencyCheck => "Dependency-Check",
            ReportFormat::Semgrep => "Semgrep",
            ReportFormat::Trivy => "Trivy",
            ReportFormat::Gitleaks => "Gitleaks",
            ReportFormat::Fossa => "FOSSA",
            ReportFormat::DotnetFormat => "dotnet format",
            ReportFormat::Checkstyle => "Checkstyle",
        };
        f.write_str(s)
    }
}

impl ReportFormat {
    /// Format of a report produced by `stage` at `path`.
    pub fn detect(stage: Stage, path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match stage {
            Stage::TestNunit | Stage::TestXunit => match ext.as_deref() {
                Some("xml") => Some(ReportFormat::JunitXml),
                _ => Some(ReportFormat::Trx),
            },
            Stage::TestJunit => Some(ReportFormat::JunitXml),
            Stage::CoverageDotnet => Some(ReportFormat::Cobertura),
            Stage::CoverageJvm => Some(ReportFormat::Jacoco),
            Stage::DependencyScan => Some(ReportFormat::DependencyCheck),
            Stage::Sast => Some(ReportFormat::Semgrep),
            Stage::ContainerScan => Some(ReportFormat::Trivy),
            Stage::SecretsScan => Some(ReportFormat::Gitleaks),
            Stage::LicenseCheck => Some(ReportFormat::Fossa),
            Stage::Lint => match ext.as_deref() {
                Some("xml") => Some(ReportFormat::Checkstyle),
                _ => Some(ReportFormat::DotnetFormat),
            },
            _ => None,
        }
    }
}

/// Parse the report `stage` wrote at `path`.
pub fn parse_report(stage: Stage, path: &Path) -> Result<Contribution, ParseError> {
    let format = ReportFormat::detect(stage, path).ok_or_else(|| ParseError::Unsupported {
        stage,
        path: path.to_path_buf(),
    })?;
    if !path.exists() {
        return Err(ParseError::Missing(path.to_path_buf()));
    }
    if path.is_dir() {
        return parse_directory(format, path);
    }

    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_content(format, path, &content)
}

/// Parse report text already in memory.
pub fn parse_content(
    format: ReportFormat,
    path: &Path,
    content: &str,
) -> Result<Contribution, ParseError> {
    let malformed = |detail: String| ParseError::Malformed {
        format,
        path: path.to_path_buf(),
        detail,
    };
    match format {
        ReportFormat::Trx => parse_trx(content).map_err(malformed),
        ReportFormat::JunitXml => parse_junit(content).map_err(malformed),
        ReportFormat::Cobertura => parse_cobertura(content).map_err(malformed),
        ReportFormat::Jacoco => parse_jacoco(content).map_err(malformed),
        ReportFormat::Checkstyle => parse_checkstyle(content).map_err(malformed),
        ReportFormat::DependencyCheck => {
            parse_dependency_check(content).map_err(|e| malformed(e.to_string()))
        }
        ReportFormat::Semgrep => parse_semgrep(content).map_err(|e| malformed(e.to_string())),
        ReportFormat::Trivy => parse_trivy(content).map_err(|e| malformed(e.to_string())),
        ReportFormat::Gitleaks => parse_gitleaks(content).map_err(|e| malformed(e.to_string())),
        ReportFormat::Fossa => parse_fossa(content).map_err(|e| malformed(e.to_string())),
        ReportFormat::DotnetFormat => {
            parse_dotnet_format(content).map_err(|e| malformed(e.to_string()))
        }
    }
}

/// Surefire and Gradle write one XML file per test class into a directory.
fn parse_directory(format: ReportFormat, dir: &Path) -> Result<Contribution, ParseError> {
    let read_err = |source| ParseError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(read_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ParseError::Malformed {
            format,
            path: dir.to_path_buf(),
            detail: "directory contains no XML reports".to_string(),
        });
    }

    let mut totals = TestTotals::default();
    let mut reported_total = 0u64;
    for file in &files {
        let content = std::fs::read_to_string(file).map_err(|source| ParseError::Read {
            path: file.clone(),
            source,
        })?;
        if let Some(tests) = parse_content(format, file, &content)?.tests {
            reported_total += tests.total;
            totals.add(&tests);
        }
    }
    totals.total = reported_total;
    Ok(Contribution::tests(totals))
}

// ---------------------------------------------------------------------------
// XML reports
// ---------------------------------------------------------------------------

type Attributes = BTreeMap<String, String>;

/// Attributes of every `name` element, in document order.
///
/// Matches on the local name so namespaced documents (TRX) resolve the same
/// as plain ones. Comments and processing instructions are skipped.
fn elements(content: &str, name: &str) -> Result<Vec<Attributes>, String> {
    let mut reader = Reader::from_str(content);
    let mut buf = Vec::new();
    let mut found = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == name.as_bytes() {
                    found.push(attributes(&e)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "invalid XML at byte {}: {e}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

fn attributes(element: &BytesStart<'_>) -> Result<Attributes, String> {
    let mut attrs = Attributes::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| format!("invalid attribute: {e}"))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| format!("invalid value for {key}: {e}"))?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

/// The first `name` element, or an error naming it.
fn first_element(content: &str, name: &str) -> Result<Attributes, String> {
    elements(content, name)?
        .into_iter()
        .next()
        .ok_or_else(|| format!("missing <{name}> element"))
}

fn parse_number(key: &str, raw: &str) -> Result<u64, String> {
    raw.trim()
        .parse::<f64>()
        .map(|v| v.max(0.0) as u64)
        .map_err(|_| format!("attribute {key}=\"{raw}\" is not a number"))
}

/// A count the report format always carries.
fn required(attrs: &Attributes, element: &str, key: &str) -> Result<u64, String> {
    let raw = attrs
        .get(key)
        .ok_or_else(|| format!("<{element}> has no {key} attribute"))?;
    parse_number(key, raw)
}

/// A count some producers omit when it is zero.
fn optional(attrs: &Attributes, key: &str) -> Result<u64, String> {
    attrs.get(key).map_or(Ok(0), |raw| parse_number(key, raw))
}

fn parse_trx(content: &str) -> Result<Contribution, String> {
    let attrs = first_element(content, "Counters")?;

    let total = required(&attrs, "Counters", "total")?;
    let passed = required(&attrs, "Counters", "passed")?;
    let failed = required(&attrs, "Counters", "failed")?
        + optional(&attrs, "error")?
        + optional(&attrs, "timeout")?
        + optional(&attrs, "aborted")?;
    let skipped = total.saturating_sub(passed + failed);
    Ok(Contribution::tests(TestTotals {
        total,
        passed,
        failed,
        skipped,
    }))
}

fn parse_junit(content: &str) -> Result<Contribution, String> {
    let suites = elements(content, "testsuite")?;
    if suites.is_empty() {
        return Err("missing <testsuite> element".to_string());
    }

    let mut totals = TestTotals::default();
    for suite in &suites {
        let tests = required(suite, "testsuite", "tests")?;
        let failed = optional(suite, "failures")? + optional(suite, "errors")?;
        let skipped = optional(suite, "skipped")?;
        totals.total += tests;
        totals.failed += failed;
        totals.skipped += skipped;
        totals.passed += tests.saturating_sub(failed + skipped);
    }
    Ok(Contribution::tests(totals))
}

fn parse_cobertura(content: &str) -> Result<Contribution, String> {
    let attrs = first_element(content, "coverage")?;

    if attrs.contains_key("lines-covered") && attrs.contains_key("lines-valid") {
        return Ok(Contribution::coverage(CoverageSample::Lines {
            covered: required(&attrs, "coverage", "lines-covered")?,
            valid: required(&attrs, "coverage", "lines-valid")?,
        }));
    }
    let rate = attrs
        .get("line-rate")
        .ok_or_else(|| "missing line counts and line-rate".to_string())?;
    let rate: f64 = rate
        .trim()
        .parse()
        .map_err(|_| format!("line-rate \"{rate}\" is not a number"))?;
    Ok(Contribution::coverage(CoverageSample::Percent(rate * 100.0)))
}

/// The report-level LINE counter is the last one in the document.
fn parse_jacoco(content: &str) -> Result<Contribution, String> {
    let counters = elements(content, "counter")?;
    let line = counters
        .iter()
        .rev()
        .find(|attrs| attrs.get("type").map(String::as_str) == Some("LINE"))
        .ok_or_else(|| "missing LINE counter".to_string())?;

    let missed = required(line, "counter", "missed")?;
    let covered = required(line, "counter", "covered")?;
    Ok(Contribution::coverage(CoverageSample::Lines {
        covered,
        valid: covered + missed,
    }))
}

fn parse_checkstyle(content: &str) -> Result<Contribution, String> {
    first_element(content, "checkstyle")?;
    let errors = elements(content, "error")?.len();
    Ok(Contribution::findings(saturate(errors as u64), 0))
}

// ---------------------------------------------------------------------------
// JSON reports
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DependencyCheckReport {
    #[serde(default)]
    dependencies: Vec<DependencyCheckDependency>,
}

#[derive(Deserialize)]
struct DependencyCheckDependency {
    #[serde(default)]
    vulnerabilities: Vec<SeverityOnly>,
}

#[derive(Deserialize)]
struct SeverityOnly {
    #[serde(default)]
    severity: String,
}

fn parse_dependency_check(content: &str) -> serde_json::Result<Contribution> {
    let report: DependencyCheckReport = serde_json::from_str(content)?;
    let severities = report
        .dependencies
        .iter()
        .flat_map(|d| d.vulnerabilities.iter())
        .map(|v| v.severity.as_str());
    Ok(count_findings(severities, &["CRITICAL"]))
}

#[derive(Deserialize)]
struct SemgrepReport {
    results: Vec<SemgrepResult>,
}

#[derive(Deserialize)]
struct SemgrepResult {
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Deserialize, Default)]
struct SemgrepExtra {
    #[serde(default)]
    severity: String,
}

fn parse_semgrep(content: &str) -> serde_json::Result<Contribution> {
    let report: SemgrepReport = serde_json::from_str(content)?;
    let severities = report.results.iter().map(|r| r.extra.severity.as_str());
    Ok(count_findings(severities, &["ERROR", "CRITICAL"]))
}

#[derive(Deserialize)]
struct TrivyReport {
    #[serde(rename = "Results", default)]
    results: Option<Vec<TrivyTarget>>,
}

#[derive(Deserialize)]
struct TrivyTarget {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyFinding>>,
    #[serde(rename = "Misconfigurations", default)]
    misconfigurations: Option<Vec<TrivyFinding>>,
}

#[derive(Deserialize)]
struct TrivyFinding {
    #[serde(rename = "Severity", default)]
    severity: String,
}

fn parse_trivy(content: &str) -> serde_json::Result<Contribution> {
    let report: TrivyReport = serde_json::from_str(content)?;
    let targets = report.results.unwrap_or_default();
    let severities = targets.iter().flat_map(|t| {
        t.vulnerabilities
            .iter()
            .flatten()
            .chain(t.misconfigurations.iter().flatten())
            .map(|f| f.severity.as_str())
    });
    Ok(count_findings(severities, &["CRITICAL"]))
}

/// Every leaked secret is critical.
fn parse_gitleaks(content: &str) -> serde_json::Result<Contribution> {
    let leaks: Vec<serde_json::Value> = serde_json::from_str(content)?;
    let count = saturate(leaks.len() as u64);
    Ok(Contribution::findings(count, count))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FossaReport {
    Issues(Vec<FossaIssue>),
    Wrapped {
        #[serde(default)]
        issues: Vec<FossaIssue>,
    },
}

#[derive(Deserialize)]
struct FossaIssue {
    #[serde(rename = "type", default)]
    kind: String,
}

fn parse_fossa(content: &str) -> serde_json::Result<Contribution> {
    // `fossa test` prints nothing when there are no issues.
    if content.trim().is_empty() {
        return Ok(Contribution::findings(0, 0));
    }
    let issues = match serde_json::from_str::<FossaReport>(content)? {
        FossaReport::Issues(issues) | FossaReport::Wrapped { issues } => issues,
    };
    let kinds = issues.iter().map(|i| i.kind.as_str());
    Ok(count_findings(kinds, &["policy_conflict", "policy_flag"]))
}

#[derive(Deserialize)]
struct FormattedDocument {
    #[serde(rename = "FileChanges", default)]
    file_changes: Vec<serde_json::Value>,
}

fn parse_dotnet_format(content: &str) -> serde_json::Result<Contribution> {
    let documents: Vec<FormattedDocument> = serde_json::from_str(content)?;
    let changes: usize = documents.iter().map(|d| d.file_changes.len()).sum();
    Ok(Contribution::findings(saturate(changes as u64), 0))
}

fn count_findings<'a>(
    labels: impl Iterator<Item = &'a str>,
    critical: &[&str],
) -> Contribution {
    let (total, critical) = labels.fold((0u64, 0u64), |(total, crit), label| {
        let is_critical = critical.iter().any(|c| c.eq_ignore_ascii_case(label));
        (total + 1, crit + u64::from(is_critical))
    });
    Contribution::findings(saturate(total), saturate(critical))
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(format: ReportFormat, content: &str) -> Contribution {
        parse_content(format, Path::new("report"), content).expect("parse failed")
    }

    #[test]
    fn test_trx_counters() {
        let trx = r#"<?xml version="1.0" encoding="utf-8"?>
<TestRun xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010">
  <ResultSummary outcome="Failed">
    <Counters total="12" executed="11" passed="9" failed="2" error="0" timeout="0" aborted="0" inconclusive="0" notExecuted="1" />
  </ResultSummary>
</TestRun>"#;
        let tests = parse(ReportFormat::Trx, trx).tests.unwrap();
        assert_eq!(tests, TestTotals::from_outcomes(9, 2, 1));
    }

    #[test]
    fn test_trx_without_counters_is_malformed() {
        let err = parse_content(ReportFormat::Trx, Path::new("a.trx"), "<TestRun/>").unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
        assert!(err.to_string().contains("Counters"));
    }

    #[test]
    fn test_junit_sums_suites() {
        let xml = r#"<?xml version="1.0"?>
<testsuites>
  <testsuite name="CalculatorTest" tests="5" failures="1" errors="1" skipped="1" time="0.1"/>
  <testsuite name="ParserTest" tests="3" failures="0" errors="0" skipped="0" time="0.1">
    <testcase name="parses"/>
  </testsuite>
</testsuites>"#;
        let tests = parse(ReportFormat::JunitXml, xml).tests.unwrap();
        assert_eq!(tests.total, 8);
        assert_eq!(tests.failed, 2);
        assert_eq!(tests.skipped, 1);
        assert_eq!(tests.passed, 5);
        assert!(tests.is_consistent());
    }

    #[test]
    fn test_junit_ignores_testsuites_wrapper() {
        let xml = r#"<testsuites tests="100"><testsuite tests="2" failures="0"/></testsuites>"#;
        assert_eq!(parse(ReportFormat::JunitXml, xml).tests.unwrap().total, 2);
    }

    #[test]
    fn test_trx_single_quoted_attributes() {
        let trx = "<TestRun><ResultSummary><Counters total='10' passed='9' failed='1'/></ResultSummary></TestRun>";
        let tests = parse(ReportFormat::Trx, trx).tests.unwrap();
        assert_eq!(tests, TestTotals::from_outcomes(9, 1, 0));
    }

    #[test]
    fn test_trx_missing_required_count_is_malformed() {
        let trx = r#"<TestRun><ResultSummary><Counters total="10" passed="9"/></ResultSummary></TestRun>"#;
        let err = parse_content(ReportFormat::Trx, Path::new("a.trx"), trx).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
        assert!(err.to_string().contains("failed"), "{err}");
    }

    #[test]
    fn test_junit_skips_commented_suites() {
        let xml = r#"<testsuites>
  <!-- <testsuite tests="100" failures="50"/> -->
  <testsuite name="AddTest" tests="2" failures="0" errors="0" skipped="0"/>
</testsuites>"#;
        let tests = parse(ReportFormat::JunitXml, xml).tests.unwrap();
        assert_eq!(tests, TestTotals::from_outcomes(2, 0, 0));
    }

    #[test]
    fn test_junit_suite_without_tests_is_malformed() {
        let xml = r#"<testsuite name="AddTest" failures="1"/>"#;
        let err = parse_content(ReportFormat::JunitXml, Path::new("TEST-a.xml"), xml).unwrap_err();
        assert!(err.to_string().contains("tests"), "{err}");
    }

    #[test]
    fn test_unbalanced_xml_is_malformed() {
        let xml = r#"<testsuites><testsuite tests="2"></testsuites>"#;
        let err = parse_content(ReportFormat::JunitXml, Path::new("TEST-a.xml"), xml).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn test_cobertura_lines() {
        let xml = r#"<coverage line-rate="0.8" lines-covered="80" lines-valid="100" version="1.9"></coverage>"#;
        assert_eq!(
            parse(ReportFormat::Cobertura, xml).coverage,
            Some(CoverageSample::Lines {
                covered: 80,
                valid: 100
            })
        );
    }

    #[test]
    fn test_cobertura_rate_only() {
        let xml = r#"<coverage line-rate="0.5"></coverage>"#;
        assert_eq!(
            parse(ReportFormat::Cobertura, xml).coverage,
            Some(CoverageSample::Percent(50.0))
        );
    }

    #[test]
    fn test_jacoco_uses_report_level_counter() {
        let xml = r#"<report name="calc">
  <package name="calc">
    <counter type="INSTRUCTION" missed="5" covered="50"/>
    <counter type="LINE" missed="1" covered="9"/>
  </package>
  <counter type="INSTRUCTION" missed="10" covered="90"/>
  <counter type="LINE" missed="4" covered="36"/>
  <counter type="METHOD" missed="1" covered="9"/>
</report>"#;
        assert_eq!(
            parse(ReportFormat::Jacoco, xml).coverage,
            Some(CoverageSample::Lines {
                covered: 36,
                valid: 40
            })
        );
    }

    #[test]
    fn test_checkstyle_errors_are_never_critical() {
        let xml = r#"<checkstyle version="10.12"><file name="A.java"><error line="1" severity="error" message="x"/><error line="2" severity="warning" message="y"/></file></checkstyle>"#;
        assert_eq!(
            parse(ReportFormat::Checkstyle, xml).findings,
            Some(FindingCounts::new(2, 0))
        );
    }

    #[test]
    fn test_dependency_check() {
        let json = r#"{"dependencies":[
            {"fileName":"a.jar","vulnerabilities":[{"severity":"CRITICAL"},{"severity":"HIGH"}]},
            {"fileName":"b.jar"}
        ]}"#;
        assert_eq!(
            parse(ReportFormat::DependencyCheck, json).findings,
            Some(FindingCounts::new(2, 1))
        );
    }

    #[test]
    fn test_semgrep_error_is_critical() {
        let json = r#"{"results":[
            {"check_id":"a","extra":{"severity":"ERROR"}},
            {"check_id":"b","extra":{"severity":"WARNING"}},
            {"check_id":"c","extra":{"severity":"INFO"}}
        ],"errors":[]}"#;
        assert_eq!(
            parse(ReportFormat::Semgrep, json).findings,
            Some(FindingCounts::new(3, 1))
        );
    }

    #[test]
    fn test_trivy_counts_vulnerabilities_and_misconfigurations() {
        let json = r#"{"Results":[
            {"Target":"pom.xml","Vulnerabilities":[{"Severity":"CRITICAL"},{"Severity":"LOW"}]},
            {"Target":"Dockerfile","Vulnerabilities":null,"Misconfigurations":[{"Severity":"CRITICAL"}]}
        ]}"#;
        assert_eq!(
            parse(ReportFormat::Trivy, json).findings,
            Some(FindingCounts::new(3, 2))
        );
    }

    #[test]
    fn test_trivy_clean_report() {
        assert_eq!(
            parse(ReportFormat::Trivy, r#"{"SchemaVersion":2}"#).findings,
            Some(FindingCounts::new(0, 0))
        );
    }

    #[test]
    fn test_gitleaks_every_leak_is_critical() {
        let json = r#"[{"RuleID":"aws-access-key"},{"RuleID":"generic-api-key"}]"#;
        assert_eq!(
            parse(ReportFormat::Gitleaks, json).findings,
            Some(FindingCounts::new(2, 2))
        );
    }

    #[test]
    fn test_fossa_shapes() {
        let wrapped = r#"{"issues":[{"type":"policy_conflict"},{"type":"outdated_dependency"}]}"#;
        assert_eq!(
            parse(ReportFormat::Fossa, wrapped).findings,
            Some(FindingCounts::new(2, 1))
        );
        let bare = r#"[{"type":"policy_flag"}]"#;
        assert_eq!(
            parse(ReportFormat::Fossa, bare).findings,
            Some(FindingCounts::new(1, 1))
        );
        assert_eq!(
            parse(ReportFormat::Fossa, "").findings,
            Some(FindingCounts::new(0, 0))
        );
    }

    #[test]
    fn test_dotnet_format_report() {
        let json = r#"[
            {"FileName":"A.cs","FileChanges":[{"LineNumber":1},{"LineNumber":4}]},
            {"FileName":"B.cs","FileChanges":[{"LineNumber":2}]}
        ]"#;
        assert_eq!(
            parse(ReportFormat::DotnetFormat, json).findings,
            Some(FindingCounts::new(3, 0))
        );
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = parse_content(ReportFormat::Semgrep, Path::new("s.json"), "{not json").unwrap_err();
        assert!(matches!(
            err,
            ParseError::Malformed {
                format: ReportFormat::Semgrep,
                ..
            }
        ));
    }

    #[test]
    fn test_detect() {
        assert_eq!(
            ReportFormat::detect(Stage::TestNunit, Path::new("a.trx")),
            Some(ReportFormat::Trx)
        );
        assert_eq!(
            ReportFormat::detect(Stage::Lint, Path::new("target/checkstyle-result.xml")),
            Some(ReportFormat::Checkstyle)
        );
        assert_eq!(
            ReportFormat::detect(Stage::Lint, Path::new("format-report.json")),
            Some(ReportFormat::DotnetFormat)
        );
        assert_eq!(ReportFormat::detect(Stage::BuildJvm, Path::new("x")), None);
    }

    #[test]
    fn test_parse_missing_report() {
        let err = parse_report(Stage::Sast, Path::new("/nonexistent/semgrep.json")).unwrap_err();
        assert!(matches!(err, ParseError::Missing(_)));
    }

    #[test]
    fn test_parse_surefire_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("TEST-calc.AddTest.xml"),
            r#"<testsuite name="AddTest" tests="4" failures="1" errors="0" skipped="0"/>"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("TEST-calc.DivTest.xml"),
            r#"<testsuite name="DivTest" tests="2" failures="0" errors="0" skipped="1"/>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("calc.AddTest.txt"), "plain text summary").unwrap();

        let tests = parse_report(Stage::TestJunit, dir.path())
            .unwrap()
            .tests
            .unwrap();
        assert_eq!(tests, TestTotals::from_outcomes(4, 1, 1));
    }

    #[test]
    fn test_empty_report_directory_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_report(Stage::TestJunit, dir.path()).unwrap_err();
        assert!(err.to_string().contains("no XML reports"));
    }

    #[test]
    fn test_from_metrics() {
        let result = StageResult::success(Stage::TestNunit)
            .with_metric(metric::EXIT_CODE, 0.0)
            .with_metric(metric::TESTS_PASSED, 9.0)
            .with_metric(metric::TESTS_FAILED, 1.0);
        let contribution = Contribution::from_metrics(&result).unwrap();
        assert_eq!(contribution.tests, Some(TestTotals::from_outcomes(9, 1, 0)));
        assert_eq!(contribution.findings, None);

        let exit_only = StageResult::success(Stage::Sast).with_metric(metric::EXIT_CODE, 0.0);
        assert_eq!(Contribution::from_metrics(&exit_only), None);
    }

    #[test]
    fn test_from_metrics_findings() {
        let result = StageResult::success(Stage::Sast).with_metric(metric::FINDINGS_CRITICAL, 3.0);
        assert_eq!(
            Contribution::from_metrics(&result).unwrap().findings,
            Some(FindingCounts::new(3, 3))
        );
    }
}
