//! 치명적 오류 알림
//!
//! 감시기가 수집한 치명적 오류 블록을 알림 메시지로 구성해 전송합니다.
//! 전송 경로는 트레이트로 추상화되어 있고 기본 구현은 경고 로그로 흘려보냅니다.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::AlertConfig;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::monitor::CriticalBlock;

/// 알림 메시지
#[derive(Debug, Clone)]
pub struct AlertMessage {
    /// 제목
    pub subject: String,
    /// 본문
    pub body: String,
    /// 수신자 (미설정 가능)
    pub recipient: Option<String>,
}

/// 알림 전송 경로
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// 전송 경로 이름
    fn name(&self) -> &'static str;

    /// 알림 메시지 전송
    async fn send(&self, message: &AlertMessage) -> Result<()>;
}

/// 경고 로그로 알림을 흘려보내는 기본 전송 경로
///
/// 실제 메일 발송 대신 전송했을 내용을 로그에 남깁니다.
pub struct LogAlertTransport;

#[async_trait]
impl AlertTransport for LogAlertTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        let recipient = message.recipient.as_deref().unwrap_or("(미지정)");
        warn!(
            subject = %message.subject,
            "Email would be sent to {}: {}",
            recipient,
            message.body
        );
        Ok(())
    }
}

/// 전송된 알림을 메모리에 모으는 전송 경로 (테스트용)
#[derive(Default)]
pub struct MemoryAlertTransport {
    sent: Mutex<Vec<AlertMessage>>,
}

impl MemoryAlertTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 전송된 알림 목록
    pub async fn sent(&self) -> Vec<AlertMessage> {
        self.sent.lock().await.clone()
    }

    /// 전송된 알림 수
    pub async fn len(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sent.lock().await.is_empty()
    }
}

#[async_trait]
impl AlertTransport for MemoryAlertTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, message: &AlertMessage) -> Result<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

/// 알림 디스패처
///
/// 한 번의 검사 결과는 최대 한 건의 알림으로 묶입니다.
pub struct AlertDispatcher {
    config: AlertConfig,
    transport: Arc<dyn AlertTransport>,
}

impl AlertDispatcher {
    /// 기본 전송 경로(경고 로그)로 디스패처 생성
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            transport: Arc::new(LogAlertTransport),
        }
    }

    /// 지정한 전송 경로로 디스패처 생성
    pub fn with_transport(config: AlertConfig, transport: Arc<dyn AlertTransport>) -> Self {
        Self { config, transport }
    }

    /// 치명적 오류 블록들을 한 건의 알림으로 전송
    ///
    /// 알림이 비활성화됐거나 블록이 없으면 전송하지 않고 false를 반환합니다.
    pub async fn dispatch_critical(&self, blocks: &[CriticalBlock]) -> Result<bool> {
        if !self.config.enabled {
            debug!("알림이 비활성화되어 전송 생략");
            return Ok(false);
        }
        if blocks.is_empty() {
            return Ok(false);
        }

        let message = self.compose(blocks);
        match self.transport.send(&message).await {
            Ok(()) => {
                PipelineMetrics::record_alert_sent();
                debug!(
                    transport = self.transport.name(),
                    blocks = blocks.len(),
                    "치명적 오류 알림 전송 완료"
                );
                Ok(true)
            }
            Err(e) => {
                PipelineMetrics::record_alert_failure();
                error!(
                    error = %e,
                    transport = self.transport.name(),
                    "알림 전송 실패"
                );
                Err(PipelineError::AlertTransport(e.to_string()).into())
            }
        }
    }

    /// 블록들을 제목/본문으로 구성
    fn compose(&self, blocks: &[CriticalBlock]) -> AlertMessage {
        let now = Utc::now();
        let subject = format!(
            "{} 치명적 오류 {}건 감지 - {}",
            self.config.subject_prefix,
            blocks.len(),
            now.format("%Y-%m-%d %H:%M:%S")
        );

        let mut body = format!(
            "치명적 오류 {}건이 감지되었습니다.\n검사 시각: {} UTC\n",
            blocks.len(),
            now.format("%Y-%m-%d %H:%M:%S")
        );

        let shown = blocks.len().min(self.config.max_errors_per_alert);
        for (index, block) in blocks.iter().take(shown).enumerate() {
            body.push_str(&format!("\n[{}] ({})\n{}\n", index + 1, block.source, block.render()));
        }
        if blocks.len() > shown {
            body.push_str(&format!("\n외 {}건 생략\n", blocks.len() - shown));
        }

        AlertMessage {
            subject,
            body,
            recipient: self.config.recipient.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn block(line: &str) -> CriticalBlock {
        CriticalBlock {
            timestamp: Utc::now(),
            lines: vec![line.to_string()],
            source: "app.log".to_string(),
        }
    }

    fn enabled_config() -> AlertConfig {
        AlertConfig {
            enabled: true,
            recipient: Some("ops@example.com".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_single_alert_for_many_blocks() {
        let transport = Arc::new(MemoryAlertTransport::new());
        let dispatcher = AlertDispatcher::with_transport(enabled_config(), transport.clone());

        let blocks = vec![
            block("[ERROR] 첫 번째"),
            block("[ERROR] 두 번째"),
            block("[FATAL] 세 번째"),
        ];
        let sent = dispatcher.dispatch_critical(&blocks).await.unwrap();

        assert!(sent);
        assert_eq!(transport.len().await, 1);

        let messages = transport.sent().await;
        assert!(messages[0].subject.contains("3건"));
        assert!(messages[0].body.contains("첫 번째"));
        assert!(messages[0].body.contains("세 번째"));
        assert_eq!(
            messages[0].recipient.as_deref(),
            Some("ops@example.com")
        );
    }

    #[tokio::test]
    async fn test_dispatch_skips_when_disabled() {
        let transport = Arc::new(MemoryAlertTransport::new());
        let config = AlertConfig {
            enabled: false,
            ..Default::default()
        };
        let dispatcher = AlertDispatcher::with_transport(config, transport.clone());

        let sent = dispatcher
            .dispatch_critical(&[block("[ERROR] 무시됨")])
            .await
            .unwrap();

        assert!(!sent);
        assert!(transport.is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_skips_empty_blocks() {
        let transport = Arc::new(MemoryAlertTransport::new());
        let dispatcher = AlertDispatcher::with_transport(enabled_config(), transport.clone());

        let sent = dispatcher.dispatch_critical(&[]).await.unwrap();
        assert!(!sent);
        assert!(transport.is_empty().await);
    }

    #[tokio::test]
    async fn test_body_truncates_beyond_max_errors() {
        let transport = Arc::new(MemoryAlertTransport::new());
        let mut config = enabled_config();
        config.max_errors_per_alert = 2;
        let dispatcher = AlertDispatcher::with_transport(config, transport.clone());

        let blocks = vec![
            block("[ERROR] 하나"),
            block("[ERROR] 둘"),
            block("[ERROR] 셋"),
            block("[ERROR] 넷"),
        ];
        dispatcher.dispatch_critical(&blocks).await.unwrap();

        let messages = transport.sent().await;
        assert!(messages[0].body.contains("하나"));
        assert!(messages[0].body.contains("둘"));
        assert!(!messages[0].body.contains("셋"));
        assert!(messages[0].body.contains("외 2건 생략"));
    }

    #[tokio::test]
    async fn test_failing_transport_propagates_error() {
        struct FailingTransport;

        #[async_trait]
        impl AlertTransport for FailingTransport {
            fn name(&self) -> &'static str {
                "failing"
            }

            async fn send(&self, _message: &AlertMessage) -> Result<()> {
                anyhow::bail!("전송 경로 차단")
            }
        }

        let dispatcher =
            AlertDispatcher::with_transport(enabled_config(), Arc::new(FailingTransport));

        let result = dispatcher.dispatch_critical(&[block("[ERROR] 실패")]).await;
        assert!(result.is_err());
    }
}
