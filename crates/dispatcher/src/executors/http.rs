use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{info, warn};

use control_plane_core::{ControlPlaneError, ControlPlaneResult, HttpParams, ScheduledTask};

/// HTTP任务执行器
///
/// 只有请求无法完成（连接失败、超时）才视为执行失败，
/// 任何HTTP状态码都算执行成功，非2xx状态只记录警告。
#[derive(Clone, Default)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn parse_method(method: &str) -> ControlPlaneResult<Method> {
        let upper = method.trim().to_uppercase();
        let upper = if upper.is_empty() { "GET".to_string() } else { upper };
        match upper.as_str() {
            "GET" | "POST" | "PUT" | "DELETE" | "PATCH" | "HEAD" | "OPTIONS" => {
                Method::from_bytes(upper.as_bytes()).map_err(|e| {
                    ControlPlaneError::InvalidTaskParams(format!("无效的HTTP方法: {e}"))
                })
            }
            _ => Err(ControlPlaneError::InvalidTaskParams(format!(
                "不支持的HTTP方法: {method}"
            ))),
        }
    }

    pub async fn execute(&self, task: &ScheduledTask, params: &HttpParams) -> ControlPlaneResult<()> {
        let method = Self::parse_method(&params.method)?;
        let timeout_seconds = params.timeout_seconds();

        info!(
            task_id = task.id,
            "执行HTTP任务: {} {}", method, params.url
        );

        let mut request = self
            .client
            .request(method.clone(), &params.url)
            .timeout(Duration::from_secs(timeout_seconds));

        for (key, value) in &params.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        request = match &params.body {
            Some(Value::String(body)) => request.body(body.clone()),
            Some(body) => request.json(body),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ControlPlaneError::Timeout(format!(
                    "HTTP请求超时({timeout_seconds}秒): {}",
                    params.url
                ))
            } else {
                ControlPlaneError::Network(format!("HTTP请求失败: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            info!(task_id = task.id, status = status.as_u16(), "HTTP任务执行完成");
        } else {
            warn!(
                task_id = task.id,
                status = status.as_u16(),
                "HTTP任务返回非成功状态码: {} {}", method, params.url
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
    use control_plane_testing_utils::TaskBuilder;
    use std::collections::HashMap;

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/echo",
                post(|Json(body): Json<Value>| async move { Json(body) }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "slow"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn params(url: String, method: &str) -> HttpParams {
        HttpParams {
            url,
            method: method.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(HttpExecutor::parse_method("post").unwrap(), Method::POST);
        assert_eq!(HttpExecutor::parse_method("").unwrap(), Method::GET);
        assert!(HttpExecutor::parse_method("TRACE").is_err());
    }

    #[tokio::test]
    async fn test_any_status_counts_as_success() {
        let base = spawn_server().await;
        let executor = HttpExecutor::new();
        let task = TaskBuilder::new().build();

        executor
            .execute(&task, &params(format!("{base}/ok"), "GET"))
            .await
            .unwrap();
        executor
            .execute(&task, &params(format!("{base}/missing"), "GET"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_json_body_is_sent() {
        let base = spawn_server().await;
        let executor = HttpExecutor::new();
        let task = TaskBuilder::new().build();

        let mut request = params(format!("{base}/echo"), "POST");
        request.body = Some(serde_json::json!({"hello": "world"}));
        executor.execute(&task, &request).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_and_connection_errors() {
        let base = spawn_server().await;
        let executor = HttpExecutor::new();
        let task = TaskBuilder::new().build();

        let mut slow = params(format!("{base}/slow"), "GET");
        slow.timeout = Some(1);
        let err = executor.execute(&task, &slow).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Timeout(_)));

        let unreachable = params("http://127.0.0.1:1/".to_string(), "GET");
        let err = executor.execute(&task, &unreachable).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Network(_)));
    }
}
