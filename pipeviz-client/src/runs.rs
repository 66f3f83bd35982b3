//! Run resolution and container log endpoints

use async_trait::async_trait;
use futures::StreamExt;

use pipeviz_core::domain::RunRef;

use crate::ClusterClient;
use crate::error::{ClusterError, Result};
use crate::lines::split_lines;
use crate::source::{LineStream, ResolvedRun, RunSource};

impl ClusterClient {
    fn pod_log_url(&self, pod: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods/{}/log",
            self.base_url, self.namespace, pod
        )
    }
}

#[async_trait]
impl RunSource for ClusterClient {
    async fn resolve_run(&self, run: &RunRef) -> Result<ResolvedRun> {
        let name = run.activity_name();
        tracing::debug!("Resolving run {} (activity {})", run, name);

        let activity = self.get_activity(&name).await.map_err(|e| match e {
            ClusterError::NotFound(_) => ClusterError::NotFound(format!("run {}", run)),
            other => other,
        })?;

        Ok(ResolvedRun::from(&activity))
    }

    async fn tail_container(&self, pod: &str, container: &str) -> Result<LineStream> {
        let response = self
            .get(&self.pod_log_url(pod))
            .query(&[("container", container), ("follow", "true")])
            .send()
            .await?;
        let response = self.check_status(response).await?;

        tracing::debug!("Following log of {}/{}", pod, container);

        let lines = split_lines(response.bytes_stream())
            .map(|line| line.map_err(ClusterError::from));

        Ok(lines.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pipeviz_core::domain::PipelineStatus;

    #[tokio::test]
    async fn test_resolve_run() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/apis/jenkins.io/v1/namespaces/jx/pipelineactivities/acme-widgets-main-42",
            )
            .with_status(200)
            .with_body(
                r#"{
                    "metadata": {"name": "acme-widgets-main-42"},
                    "spec": {
                        "build": "42", "status": "Running",
                        "gitOwner": "acme", "gitRepository": "widgets", "gitBranch": "main",
                        "steps": [
                            {"name": "build", "podName": "pod-1", "containerName": "build"},
                            {"name": "test", "podName": "pod-1", "containerName": "test"}
                        ]
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = ClusterClient::new(server.url(), "jx");
        let run = client
            .resolve_run(&RunRef::new("acme", "widgets", "main", 42))
            .await
            .unwrap();

        assert_eq!(run.status, PipelineStatus::Running);
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.steps[1].container_name, "test");
        assert_eq!(run.identity.build, 42);
    }

    #[tokio::test]
    async fn test_resolve_missing_run() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/apis/jenkins.io/v1/namespaces/jx/pipelineactivities/acme-widgets-main-9",
            )
            .with_status(404)
            .create_async()
            .await;

        let client = ClusterClient::new(server.url(), "jx");
        let err = client
            .resolve_run(&RunRef::new("acme", "widgets", "main", 9))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(err.to_string().contains("acme/widgets/main/9"));
    }

    #[tokio::test]
    async fn test_tail_container() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/namespaces/jx/pods/pod-1/log")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("container".into(), "build".into()),
                Matcher::UrlEncoded("follow".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body("compiling...\r\ndone\n")
            .create_async()
            .await;

        let client = ClusterClient::new(server.url(), "jx");
        let lines: Vec<String> = client
            .tail_container("pod-1", "build")
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["compiling...".to_string(), "done".to_string()]);
    }

    #[tokio::test]
    async fn test_tail_container_not_started() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/namespaces/jx/pods/pod-1/log")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(
                r#"{"kind":"Status","code":400,"message":"container \"test\" in pod \"pod-1\" is waiting to start: PodInitializing"}"#,
            )
            .create_async()
            .await;

        let client = ClusterClient::new(server.url(), "jx");
        let err = match client.tail_container("pod-1", "test").await {
            Ok(_) => panic!("expected tail to fail"),
            Err(e) => e,
        };

        assert!(err.is_not_ready());
    }
}
