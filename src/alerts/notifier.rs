use crate::alerts::alert_cache::AggregatedAlert;
use crate::error::AlertError;
use crate::events::Timestamp;
use log::info;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Outbound channel for alert messages
pub trait Notifier: Send + Sync {
    /// Short channel name used in logs
    fn name(&self) -> &str;

    /// Deliver one markdown message
    fn send<'a>(
        &'a self,
        markdown: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;
}

/// Render an aggregated alert as a markdown message
pub fn format_alert_message(alert: &AggregatedAlert, now: Timestamp) -> String {
    let mut message = String::from("### Log anomaly alert\n");
    message.push_str(&format!("> Time: {}\n", now.format("%Y-%m-%d %H:%M:%S")));
    message.push_str(&format!("> Host: {}\n", alert.host));
    message.push_str(&format!("> File: {}\n", alert.file_path));
    message.push_str(&format!(
        "> Severity: {}/10, occurrences: {}\n",
        alert.max_severity, alert.count
    ));
    if alert.is_cell_trace {
        message.push_str("> Class: cell trace\n");
    }

    message.push_str(&format!("\n**Log content:**\n```\n{}\n```\n", alert.content));

    if !alert.context_lines.is_empty() {
        message.push_str(&format!(
            "\n**Context:**\n```\n{}\n```\n",
            alert.context_lines.join("\n")
        ));
    }

    if !alert.analysis.is_empty() {
        message.push_str(&format!("\n**Analysis:**\n\n{}\n", alert.analysis));
    }

    message
}

#[derive(Debug, Serialize)]
struct WeChatMessage<'a> {
    msgtype: &'static str,
    markdown: WeChatMarkdown<'a>,
}

#[derive(Debug, Serialize)]
struct WeChatMarkdown<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct DingTalkMessage<'a> {
    msgtype: &'static str,
    markdown: DingTalkMarkdown<'a>,
}

#[derive(Debug, Serialize)]
struct DingTalkMarkdown<'a> {
    title: &'a str,
    text: &'a str,
}

/// Reply body shared by the WeChat and DingTalk webhooks
#[derive(Debug, Deserialize)]
struct WebhookReply {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

fn webhook_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

async fn post_webhook<T: Serialize + Sync>(
    client: &Client,
    webhook: &str,
    payload: &T,
) -> Result<(), AlertError> {
    let response = client.post(webhook).json(payload).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AlertError::NotificationFailed(format!(
            "webhook returned {}: {}",
            status, body
        )));
    }

    let reply: WebhookReply = response.json().await.map_err(|e| {
        AlertError::NotificationFailed(format!("unreadable webhook reply: {}", e))
    })?;
    check_reply(reply)
}

fn check_reply(reply: WebhookReply) -> Result<(), AlertError> {
    if reply.errcode != 0 {
        return Err(AlertError::Rejected {
            code: reply.errcode,
            message: reply.errmsg,
        });
    }
    Ok(())
}

/// WeCom (WeChat Work) group robot
pub struct WeChatNotifier {
    client: Client,
    webhook: String,
}

impl WeChatNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            client: webhook_client(),
            webhook,
        }
    }
}

impl Notifier for WeChatNotifier {
    fn name(&self) -> &str {
        "wechat"
    }

    fn send<'a>(
        &'a self,
        markdown: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = WeChatMessage {
                msgtype: "markdown",
                markdown: WeChatMarkdown { content: markdown },
            };
            post_webhook(&self.client, &self.webhook, &payload).await
        })
    }
}

/// DingTalk group robot
pub struct DingTalkNotifier {
    client: Client,
    webhook: String,
}

impl DingTalkNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            client: webhook_client(),
            webhook,
        }
    }
}

impl Notifier for DingTalkNotifier {
    fn name(&self) -> &str {
        "dingtalk"
    }

    fn send<'a>(
        &'a self,
        markdown: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = DingTalkMessage {
                msgtype: "markdown",
                markdown: DingTalkMarkdown {
                    title: "Log anomaly alert",
                    text: markdown,
                },
            };
            post_webhook(&self.client, &self.webhook, &payload).await
        })
    }
}

/// Writes alerts to the application log instead of a remote channel
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send<'a>(
        &'a self,
        markdown: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            info!("ALERT\n{}", markdown);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn alert() -> AggregatedAlert {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        AggregatedAlert {
            key: "web-01-server.log-abc".to_string(),
            event_id: "evt-1".to_string(),
            host: "web-01".to_string(),
            max_severity: 9,
            count: 4,
            cumulative_severity: 30,
            first_seen: t,
            last_seen: t,
            last_sent_at: Some(t),
            content: "FATAL database unreachable".to_string(),
            analysis: "Check the connection pool".to_string(),
            is_cell_trace: false,
            file_path: "/var/log/app/server.log".to_string(),
            context_lines: vec!["retrying".to_string()],
        }
    }

    #[test]
    fn test_format_alert_message() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let message = format_alert_message(&alert(), now);

        assert!(message.starts_with("### Log anomaly alert"));
        assert!(message.contains("> Time: 2024-06-01 09:00:00"));
        assert!(message.contains("> Severity: 9/10, occurrences: 4"));
        assert!(message.contains("FATAL database unreachable"));
        assert!(message.contains("retrying"));
        assert!(message.contains("Check the connection pool"));
        assert!(!message.contains("cell trace"));
    }

    #[test]
    fn test_format_omits_empty_sections() {
        let mut a = alert();
        a.analysis.clear();
        a.context_lines.clear();
        a.is_cell_trace = true;
        let message = format_alert_message(&a, Utc::now());

        assert!(!message.contains("**Analysis:**"));
        assert!(!message.contains("**Context:**"));
        assert!(message.contains("> Class: cell trace"));
    }

    #[test]
    fn test_wechat_payload_shape() {
        let payload = WeChatMessage {
            msgtype: "markdown",
            markdown: WeChatMarkdown { content: "hello" },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["msgtype"], "markdown");
        assert_eq!(json["markdown"]["content"], "hello");
    }

    #[test]
    fn test_dingtalk_payload_shape() {
        let payload = DingTalkMessage {
            msgtype: "markdown",
            markdown: DingTalkMarkdown {
                title: "t",
                text: "body",
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["markdown"]["text"], "body");
    }

    #[test]
    fn test_reply_check() {
        let ok: WebhookReply = serde_json::from_str(r#"{"errcode":0,"errmsg":"ok"}"#).unwrap();
        assert!(check_reply(ok).is_ok());

        let bad: WebhookReply =
            serde_json::from_str(r#"{"errcode":93000,"errmsg":"invalid webhook url"}"#).unwrap();
        match check_reply(bad) {
            Err(AlertError::Rejected { code, message }) => {
                assert_eq!(code, 93000);
                assert_eq!(message, "invalid webhook url");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        assert_eq!(notifier.name(), "log");
        assert!(notifier.send("### hi").await.is_ok());
    }
}
