//! Session report types and renderers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{EnvInfo, LyResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// Setup or teardown failed before the test body could decide.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestProperty {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub status: TestStatus,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "artifactDir", skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<TestProperty>,
}

impl TestRecord {
    pub fn new(name: impl Into<String>, started_at: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Passed,
            started_at: started_at.into(),
            duration_ms: 0,
            message: None,
            artifact_dir: None,
            properties: Vec::new(),
        }
    }

    /// Set a property, replacing an existing one with the same name in place.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.properties.push(TestProperty { name, value }),
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(rename = "outputRoot")]
    pub output_root: String,
    pub env: EnvInfo,
    pub tests: Vec<TestRecord>,
}

impl SessionReport {
    pub fn counts(&self) -> TestCounts {
        let mut counts = TestCounts::default();
        for t in &self.tests {
            match t.status {
                TestStatus::Passed => counts.passed += 1,
                TestStatus::Failed => counts.failed += 1,
                TestStatus::Error => counts.errors += 1,
            }
        }
        counts
    }

    pub fn all_passed(&self) -> bool {
        self.tests.iter().all(|t| t.status == TestStatus::Passed)
    }

    pub fn pretty(&self) -> String {
        let counts = self.counts();
        let mut out = String::new();
        out.push_str(&format!(
            "session={} passed={} failed={} errors={}\n",
            self.session_id, counts.passed, counts.failed, counts.errors
        ));
        out.push_str(&format!("output={}\n", self.output_root));
        for t in &self.tests {
            out.push_str(&format!("- {:?}: {}", t.status, t.name));
            if let Some(msg) = &t.message {
                out.push_str(&format!(": {msg}"));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Write `report.json` and `junit.xml` into `dir`.
pub fn write_session_report(report: &SessionReport, dir: &Path) -> LyResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let json = dir.join("report.json");
    std::fs::write(&json, serde_json::to_vec_pretty(report)?)?;
    let xml = dir.join("junit.xml");
    std::fs::write(&xml, render_junit_xml(report))?;
    Ok((json, xml))
}

pub fn render_junit_xml(report: &SessionReport) -> String {
    let counts = report.counts();
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(&format!(
        r#"<testsuite name="lytt" tests="{}" failures="{}" errors="{}" time="{}" timestamp="{}" hostname="{}">"#,
        report.tests.len(),
        counts.failed,
        counts.errors,
        (report.duration_ms as f64) / 1000.0,
        xml_escape(&report.started_at),
        xml_escape(&report.env.hostname),
    ));
    out.push('\n');

    for t in &report.tests {
        let (classname, name) = match t.name.rsplit_once('.') {
            Some((class, name)) => (class, name),
            None => ("lytt", t.name.as_str()),
        };
        out.push_str(&format!(
            r#"<testcase classname="{}" name="{}" time="{}">"#,
            xml_escape(classname),
            xml_escape(name),
            (t.duration_ms as f64) / 1000.0
        ));
        out.push('\n');
        if !t.properties.is_empty() {
            out.push_str("<properties>\n");
            for p in &t.properties {
                out.push_str(&format!(
                    r#"<property name="{}" value="{}"/>"#,
                    xml_escape(&p.name),
                    xml_escape(&p.value)
                ));
                out.push('\n');
            }
            out.push_str("</properties>\n");
        }
        let message = t.message.as_deref().unwrap_or_default();
        match t.status {
            TestStatus::Passed => {}
            TestStatus::Failed => {
                out.push_str(&format!(
                    r#"<failure message="{}">{}</failure>"#,
                    xml_escape(first_line(message)),
                    xml_escape(message)
                ));
                out.push('\n');
            }
            TestStatus::Error => {
                out.push_str(&format!(
                    r#"<error message="{}">{}</error>"#,
                    xml_escape(first_line(message)),
                    xml_escape(message)
                ));
                out.push('\n');
            }
        }
        out.push_str("</testcase>\n");
    }

    out.push_str("</testsuite>\n");
    out
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('\"', "&quot;").replace('\'', "&apos;")
}
