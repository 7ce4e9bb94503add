use sandprobe_proto::msg::ExecuteReq;

/// Ordered form fields, names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field called `name` with a single one at the position of the first,
    /// or appends it if there was none.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.fields.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                let mut idx = 0;
                self.fields.retain(|(n, _)| {
                    let keep = idx == first || *n != name;
                    idx += 1;
                    keep
                });
                self.fields[first].1 = value;
            }
            None => self.fields.push((name, value)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<&ExecuteReq> for FormData {
    fn from(req: &ExecuteReq) -> Self {
        let config = &req.config;
        let mut form = FormData::new();

        form.append("code", req.code.as_str());
        form.append("cpu_time_limit", config.cpu_time_limit.to_string());
        form.append("memory_limit", config.memory_limit.to_string());
        form.append("timeout", config.timeout.to_string());
        // unchecked checkboxes are not submitted at all
        for (name, enabled) in [
            ("allow_network", config.allow_network),
            ("allow_filesystem", config.allow_filesystem),
            ("use_docker", config.use_docker),
        ] {
            if enabled {
                form.append(name, "on");
            }
        }

        // send the code exactly as it was read
        form.set("code", req.code.as_str());
        form
    }
}

#[cfg(test)]
mod test {
    use sandprobe_proto::SandboxConfig;

    use super::*;

    #[test]
    fn test_set_replaces_all_and_keeps_first_position() {
        let mut form = FormData::new();
        form.append("code", "a");
        form.append("timeout", "30");
        form.append("code", "b");
        form.set("code", "c");

        let fields: Vec<_> = form.iter().collect();
        assert_eq!(fields, [("code", "c"), ("timeout", "30")]);
    }

    #[test]
    fn test_set_appends_missing_field() {
        let mut form = FormData::new();
        form.append("timeout", "30");
        form.set("code", "print(1)");

        assert_eq!(form.len(), 2);
        assert_eq!(form.get("code"), Some("print(1)"));
    }

    #[test]
    fn test_form_from_default_request() {
        let req = ExecuteReq {
            code: "print('hi')\r\n  ".to_owned(),
            config: SandboxConfig::default(),
        };
        let form = FormData::from(&req);

        let fields: Vec<_> = form.iter().collect();
        assert_eq!(
            fields,
            [
                ("code", "print('hi')\r\n  "),
                ("cpu_time_limit", "10"),
                ("memory_limit", "128"),
                ("timeout", "30"),
            ]
        );
    }

    #[test]
    fn test_enabled_flags_are_sent_as_on() {
        let req = ExecuteReq {
            code: String::new(),
            config: SandboxConfig {
                allow_network: true,
                use_docker: true,
                ..SandboxConfig::default()
            },
        };
        let form = FormData::from(&req);

        assert_eq!(form.get("allow_network"), Some("on"));
        assert_eq!(form.get("use_docker"), Some("on"));
        assert_eq!(form.get("allow_filesystem"), None);
    }
}
