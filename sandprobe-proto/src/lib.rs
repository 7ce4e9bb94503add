use serde::{Deserialize, Serialize};

pub mod msg;

/// One observation served by `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    pub timestamp: String,
    /// CPU usage in percent
    pub cpu: f64,
    /// Memory usage in percent
    pub memory: f64,
    pub memory_used: Quantity,
    pub memory_total: Quantity,
    #[serde(default)]
    pub security_events: Vec<SecurityEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: String,
    pub message: String,
}

/// A value the server may send either as a JSON number or as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // f64's Display already drops a trailing ".0"
            Quantity::Number(n) => write!(f, "{n}"),
            Quantity::Text(s) => f.write_str(s),
        }
    }
}

/// Resource limits and permissions the sandbox runs the submitted code with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// CPU time limit in seconds
    pub cpu_time_limit: u32,
    /// Memory limit in MB
    pub memory_limit: u32,
    /// Wall clock timeout in seconds
    pub timeout: u32,
    pub allow_network: bool,
    pub allow_filesystem: bool,
    pub use_docker: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cpu_time_limit: 10,
            memory_limit: 128,
            timeout: 30,
            allow_network: false,
            allow_filesystem: false,
            use_docker: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_stats_sample() {
        let sample: StatsSample = serde_json::from_str(
            r#"{
                "timestamp": "12:00:01",
                "cpu": 12.5,
                "memory": 40,
                "memory_used": 3276.8,
                "memory_total": "8192",
                "security_events": [
                    {"timestamp": "2024-01-01 12:00:00", "message": "blocked import"}
                ]
            }"#,
        )
        .expect("valid sample");

        assert_eq!(sample.cpu, 12.5);
        assert_eq!(sample.memory, 40.0);
        assert_eq!(sample.memory_used, Quantity::Number(3276.8));
        assert_eq!(sample.memory_total, Quantity::Text("8192".to_owned()));
        assert_eq!(sample.security_events.len(), 1);
        assert_eq!(sample.security_events[0].message, "blocked import");
    }

    #[test]
    fn test_missing_security_events_defaults_to_empty() {
        let sample: StatsSample = serde_json::from_str(
            r#"{"timestamp":"t","cpu":1,"memory":2,"memory_used":3,"memory_total":4}"#,
        )
        .expect("valid sample");

        assert!(sample.security_events.is_empty());
    }

    #[test]
    fn test_quantity_display() {
        assert_eq!(Quantity::Number(8192.0).to_string(), "8192");
        assert_eq!(Quantity::Number(1024.5).to_string(), "1024.5");
        assert_eq!(Quantity::Text("2 GB".to_owned()).to_string(), "2 GB");
    }

    #[test]
    fn test_sandbox_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.cpu_time_limit, 10);
        assert_eq!(config.memory_limit, 128);
        assert_eq!(config.timeout, 30);
        assert!(!config.allow_network && !config.allow_filesystem && !config.use_docker);
    }
}
