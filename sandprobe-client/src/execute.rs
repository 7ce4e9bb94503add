use bytes::Bytes;
use http::{Method, Request, header};
use log::{debug, info};
use sandprobe_proto::msg::{ExecuteReq, ExecuteResp};

use crate::{
    form::FormData,
    http_util::{self, Endpoint, FetchError},
    multipart::{self, Multipart},
    page::ids,
};

/// Submits code to the sandbox's execute endpoint.
#[derive(Debug, Clone)]
pub struct ExecutionForm {
    endpoint: Endpoint,
}

impl ExecutionForm {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub async fn submit(&self, req: &ExecuteReq) -> Result<ExecuteResp, FetchError> {
        let form = FormData::from(req);
        let payload = multipart::encode(&form);
        debug!(
            "submitting #{} with {} fields ({} bytes of code)",
            ids::CODE_FORM,
            form.iter().count(),
            req.code.len()
        );

        let req = self
            .build_request(payload)
            .map_err(FetchError::Transport)?;

        let resp: ExecuteResp = http_util::fetch_json(req, &self.endpoint).await?;
        info!("execution finished with status {:?}", resp.status);

        Ok(resp)
    }

    fn build_request(&self, payload: Multipart) -> anyhow::Result<Request<Bytes>> {
        let uri = self.endpoint.url("/execute");
        let req = http_util::basic_request_builder(&uri, Method::POST)?
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, payload.content_type())
            .header(header::CONTENT_LENGTH, payload.body.len())
            .body(payload.body)?;

        Ok(req)
    }
}

#[cfg(test)]
mod test {
    use axum::{Json, Router, extract, http::StatusCode, routing::post};
    use sandprobe_proto::SandboxConfig;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::{http_util::testing::serve, page::ExecutionPage};

    /// Echoes the received form fields back in `result` as a JSON object.
    async fn echo_fields(mut multipart: extract::Multipart) -> Json<Value> {
        let mut fields = serde_json::Map::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap().to_owned();
            let value = field.text().await.unwrap();
            fields.insert(name, Value::String(value));
        }
        Json(json!({
            "status": "success",
            "result": Value::Object(fields).to_string(),
            "error": null,
        }))
    }

    fn request(code: &str, config: SandboxConfig) -> ExecuteReq {
        ExecuteReq {
            code: code.to_owned(),
            config,
        }
    }

    #[tokio::test]
    async fn test_code_is_sent_verbatim() {
        let endpoint = serve(Router::new().route("/execute", post(echo_fields))).await;
        let code = "def f():\r\n    return 1  \n\nprint(f())\n";

        let resp = ExecutionForm::new(endpoint)
            .submit(&request(code, SandboxConfig::default()))
            .await
            .unwrap();

        let fields: Value = serde_json::from_str(resp.result.as_deref().unwrap()).unwrap();
        assert_eq!(fields["code"], code);
        assert_eq!(fields["cpu_time_limit"], "10");
        assert_eq!(fields["memory_limit"], "128");
        assert_eq!(fields["timeout"], "30");
        assert!(fields.get("allow_network").is_none());
    }

    #[tokio::test]
    async fn test_enabled_flags_reach_server() {
        let endpoint = serve(Router::new().route("/execute", post(echo_fields))).await;
        let config = SandboxConfig {
            allow_filesystem: true,
            timeout: 5,
            ..SandboxConfig::default()
        };

        let resp = ExecutionForm::new(endpoint)
            .submit(&request("print(1)", config))
            .await
            .unwrap();

        let fields: Value = serde_json::from_str(resp.result.as_deref().unwrap()).unwrap();
        assert_eq!(fields["allow_filesystem"], "on");
        assert_eq!(fields["timeout"], "5");
    }

    #[tokio::test]
    async fn test_error_status_body_is_still_decoded() {
        let app = Router::new().route(
            "/execute",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "result": null, "error": "boom"})),
                )
            }),
        );
        let endpoint = serve(app).await;

        let outcome = ExecutionForm::new(endpoint)
            .submit(&request("raise", SandboxConfig::default()))
            .await;
        let mut page = ExecutionPage::new();
        page.show(&outcome);

        assert_eq!(page.text_content(ids::EXECUTION_STATUS), Some("Execution failed"));
        assert_eq!(page.text_content(ids::EXECUTION_ERROR), Some("boom"));
        assert_eq!(page.text_content(ids::EXECUTION_RESULT), Some(""));
    }

    #[tokio::test]
    async fn test_non_json_body_is_request_failure() {
        let app = Router::new().route("/execute", post(|| async { "<html>oops</html>" }));
        let endpoint = serve(app).await;

        let outcome = ExecutionForm::new(endpoint)
            .submit(&request("print(1)", SandboxConfig::default()))
            .await;
        assert!(matches!(outcome, Err(FetchError::Decode(_))));

        let mut page = ExecutionPage::new();
        page.show(&outcome);
        assert_eq!(page.text_content(ids::EXECUTION_STATUS), Some("Request failed"));
        assert!(
            page.text_content(ids::EXECUTION_ERROR)
                .unwrap()
                .starts_with("invalid JSON in response")
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_failure() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint {
            server_addr: addr.to_string(),
            tls: false,
            prefer_ipv6: false,
        };
        let outcome = ExecutionForm::new(endpoint)
            .submit(&request("print(1)", SandboxConfig::default()))
            .await;

        assert!(matches!(outcome, Err(FetchError::Transport(_))));
        let mut page = ExecutionPage::new();
        page.show(&outcome);
        assert_eq!(page.text_content(ids::EXECUTION_STATUS), Some("Request failed"));
        assert_eq!(
            page.text_content(ids::EXECUTION_ERROR),
            Some("I/O error: all connection attempts failed")
        );
    }
}
