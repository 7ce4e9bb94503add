use std::{borrow::Cow, fmt::Write};

use sandprobe_proto::{SecurityEvent, StatsSample, msg::ExecuteResp};

use crate::{chart::Chart, http_util::FetchError};

/// Element IDs of the sandbox web pages.
pub mod ids {
    pub const CPU_CHART: &str = "cpuChart";
    pub const MEMORY_CHART: &str = "memoryChart";
    pub const CPU_USAGE: &str = "cpu-usage";
    pub const MEMORY_USAGE: &str = "memory-usage";
    pub const MEMORY_TOTAL: &str = "memory-total";
    pub const MEMORY_PERCENT: &str = "memory-percent";
    pub const EVENTS_LIST: &str = "events-list";
    pub const CODE_FORM: &str = "code-form";
    pub const RESULT_CONTAINER: &str = "result-container";
    pub const EXECUTION_RESULT: &str = "execution-result";
    pub const EXECUTION_ERROR: &str = "execution-error";
    pub const EXECUTION_STATUS: &str = "execution-status";
}

const NO_OUTPUT: &str = "No output";

/// State of the monitoring dashboard.
#[derive(Debug, Clone)]
pub struct DashboardPage {
    cpu_chart: Chart,
    memory_chart: Chart,
    cpu_usage: String,
    memory_usage: String,
    memory_total: String,
    memory_percent: String,
    /// newest first
    events: Vec<SecurityEvent>,
}

impl Default for DashboardPage {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardPage {
    pub fn new() -> Self {
        Self {
            cpu_chart: Chart::new("CPU Usage %"),
            memory_chart: Chart::new("Memory Usage %"),
            cpu_usage: String::new(),
            memory_usage: String::new(),
            memory_total: String::new(),
            memory_percent: String::new(),
            events: Vec::new(),
        }
    }

    pub fn apply(&mut self, sample: StatsSample) {
        self.cpu_usage = sample.cpu.to_string();
        self.memory_usage = sample.memory_used.to_string();
        self.memory_total = sample.memory_total.to_string();
        self.memory_percent = sample.memory.to_string();

        self.cpu_chart.push(sample.timestamp.as_str(), sample.cpu);
        self.memory_chart.push(sample.timestamp, sample.memory);

        // each event goes in front of the previous one
        self.events = sample.security_events;
        self.events.reverse();
    }

    #[cfg(test)]
    pub fn cpu_chart(&self) -> &Chart {
        &self.cpu_chart
    }

    #[cfg(test)]
    pub fn memory_chart(&self) -> &Chart {
        &self.memory_chart
    }

    #[cfg(test)]
    pub fn events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn text_content(&self, id: &str) -> Option<String> {
        let text = match id {
            ids::CPU_CHART => self.cpu_chart.sparkline(),
            ids::MEMORY_CHART => self.memory_chart.sparkline(),
            ids::CPU_USAGE => self.cpu_usage.clone(),
            ids::MEMORY_USAGE => self.memory_usage.clone(),
            ids::MEMORY_TOTAL => self.memory_total.clone(),
            ids::MEMORY_PERCENT => self.memory_percent.clone(),
            ids::EVENTS_LIST => self
                .events
                .iter()
                .map(|e| format!("{} {}", e.timestamp, e.message))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => return None,
        };
        Some(text)
    }

    fn field(&self, id: &str) -> String {
        let text = self.text_content(id).unwrap_or_default();
        escape_controls(&text, false).into_owned()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<16}{:<18}{}%",
            self.cpu_chart.label(),
            self.field(ids::CPU_CHART),
            self.field(ids::CPU_USAGE)
        );
        let _ = writeln!(
            out,
            "{:<16}{:<18}{}% ({} / {} MB)",
            self.memory_chart.label(),
            self.field(ids::MEMORY_CHART),
            self.field(ids::MEMORY_PERCENT),
            self.field(ids::MEMORY_USAGE),
            self.field(ids::MEMORY_TOTAL)
        );
        let _ = writeln!(out, "Security events:");
        if self.events.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        // rendered per event so a newline inside a message cannot fake another entry
        for event in &self.events {
            let _ = writeln!(
                out,
                "  [{}] {}",
                escape_controls(&event.timestamp, false),
                escape_controls(&event.message, false)
            );
        }
        out
    }
}

/// Escapes control characters so server-provided text cannot drive the terminal.
/// Newlines and tabs survive when `multiline` is set.
fn escape_controls(text: &str, multiline: bool) -> Cow<'_, str> {
    let keep = |c: char| !c.is_control() || (multiline && (c == '\n' || c == '\t'));
    if text.chars().all(keep) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if keep(c) {
            escaped.push(c);
        } else {
            let _ = write!(escaped, "\\u{{{:x}}}", c as u32);
        }
    }
    Cow::Owned(escaped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Error,
}

impl StatusClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Success => "success",
            StatusClass::Error => "error",
        }
    }
}

/// State of the code submission page's result area.
#[derive(Debug, Clone)]
pub struct ExecutionPage {
    result_visible: bool,
    status: String,
    status_class: Option<StatusClass>,
    result: String,
    error: String,
}

impl Default for ExecutionPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPage {
    pub fn new() -> Self {
        Self {
            result_visible: false,
            status: String::new(),
            status_class: None,
            result: String::new(),
            error: String::new(),
        }
    }

    pub fn show(&mut self, outcome: &Result<ExecuteResp, FetchError>) {
        self.result_visible = true;

        match outcome {
            Ok(resp) if resp.is_success() => {
                self.set_status("Execution successful", StatusClass::Success);
                self.result = resp
                    .result
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .unwrap_or(NO_OUTPUT)
                    .to_owned();
                self.error.clear();
            }
            Ok(resp) => {
                self.set_status("Execution failed", StatusClass::Error);
                self.result.clear();
                self.error = resp.error.clone().unwrap_or_default();
            }
            Err(e) => {
                self.set_status("Request failed", StatusClass::Error);
                self.result.clear();
                self.error = e.to_string();
            }
        }
    }

    fn set_status(&mut self, text: &str, class: StatusClass) {
        self.status = text.to_owned();
        self.status_class = Some(class);
    }

    /// Whether the element is shown. Only the result container and its children are ever hidden.
    pub fn is_visible(&self, id: &str) -> bool {
        match id {
            ids::RESULT_CONTAINER
            | ids::EXECUTION_STATUS
            | ids::EXECUTION_RESULT
            | ids::EXECUTION_ERROR => self.result_visible,
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn status_class(&self) -> Option<StatusClass> {
        self.status_class
    }

    /// Whether the last shown outcome was a successful execution.
    pub fn succeeded(&self) -> bool {
        self.status_class == Some(StatusClass::Success)
    }

    pub fn text_content(&self, id: &str) -> Option<&str> {
        match id {
            ids::EXECUTION_STATUS => Some(&self.status),
            ids::EXECUTION_RESULT => Some(&self.result),
            ids::EXECUTION_ERROR => Some(&self.error),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.is_visible(ids::RESULT_CONTAINER) {
            return out;
        }

        let class = self.status_class.map(|c| c.as_str()).unwrap_or_default();
        let status = self.text_content(ids::EXECUTION_STATUS).unwrap_or_default();
        let _ = writeln!(out, "[{class}] {status}");
        for id in [ids::EXECUTION_RESULT, ids::EXECUTION_ERROR] {
            let text = self.text_content(id).unwrap_or_default();
            if !text.is_empty() {
                let _ = writeln!(out, "{}", escape_controls(text, true));
            }
        }
        out
    }
}
