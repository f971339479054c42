//! 로그 이벤트 모델과 포매터
//!
//! 파이프라인을 통과하는 구조화된 로그 이벤트와 형식화를 담당합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PipelineError;

/// 심각도 열거형
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// 상세한 추적 정보 (개발환경)
    Trace = 0,
    /// 디버깅 정보 (개발/스테이징)
    Debug = 1,
    /// 일반 정보 (모든 환경)
    Info = 2,
    /// 경고 상황 (복구 가능한 오류)
    Warn = 3,
    /// 오류 상황 (복구 불가능한 오류)
    Error = 4,
    /// 시스템 중단 수준 오류
    Fatal = 5,
}

impl Severity {
    /// 심각도를 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// 원자적 저장을 위한 u8 표현
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// u8 표현에서 심각도 복원 (범위 밖 값은 Trace)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Severity::Trace,
            1 => Severity::Debug,
            2 => Severity::Info,
            3 => Severity::Warn,
            4 => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    /// ANSI 색상 코드 반환
    pub fn color_code(&self) -> &'static str {
        match self {
            Severity::Trace => "\x1b[90m",   // 회색
            Severity::Debug => "\x1b[36m",   // 청록색
            Severity::Info => "\x1b[32m",    // 녹색
            Severity::Warn => "\x1b[33m",    // 노란색
            Severity::Error => "\x1b[31m",   // 빨간색
            Severity::Fatal => "\x1b[35m",   // 자홍색
        }
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(Severity::Trace),
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "FATAL" => Ok(Severity::Fatal),
            _ => Err(()),
        }
    }
}

/// 이벤트 일련번호 생성기
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// 이벤트에 캡처된 오류 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedError {
    /// 오류 메시지
    pub message: String,
    /// 스택 트레이스 또는 원인 체인 (선택적)
    pub stack_trace: Option<String>,
}

impl CapturedError {
    /// 메시지만으로 오류 정보 생성
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// 스택 트레이스 설정
    pub fn with_stack_trace<S: Into<String>>(mut self, trace: S) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// 실제 오류 값에서 메시지와 원인 체인 캡처
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("Caused by: {}", cause));
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            stack_trace: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\n"))
            },
        }
    }

    /// 텍스트 로그에 이어 쓸 연속 줄 생성
    ///
    /// 스택 줄은 "    at ..." 형태로, 원인 체인은 "Caused by: ..." 형태로
    /// 정규화되어 모니터의 블록 수집 규칙과 맞물립니다.
    pub fn continuation_lines(&self) -> Vec<String> {
        let Some(trace) = &self.stack_trace else {
            return Vec::new();
        };

        trace
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                if line.starts_with("Caused by:") {
                    line.to_string()
                } else if line.starts_with("at ") {
                    format!("    {}", line)
                } else {
                    format!("    at {}", line)
                }
            })
            .collect()
    }
}

/// 구조화된 로그 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// 수집 시점에 부여되는 단조 증가 일련번호
    pub seq: u64,

    /// 타임스탬프 (UTC)
    pub timestamp: DateTime<Utc>,

    /// 심각도
    pub severity: Severity,

    /// 발생시킨 로거 이름 (점 구분 계층, 예: "app.db.pool")
    pub logger: String,

    /// 메시지 템플릿 (`{}` 자리 표시자 지원)
    pub message: String,

    /// 템플릿 치환 인자
    pub args: Vec<String>,

    /// 캡처된 오류 (선택적)
    pub error: Option<CapturedError>,

    /// 방출 시점의 상관 컨텍스트 스냅샷
    pub context: HashMap<String, String>,

    /// 상관 ID (선택적)
    pub correlation_id: Option<String>,
}

impl LogEvent {
    /// 새 로그 이벤트 생성
    ///
    /// 일련번호와 타임스탬프는 생성 시점에 부여됩니다.
    pub fn new(
        severity: Severity,
        logger: impl Into<String>,
        message: impl Into<String>,
        args: &[&str],
    ) -> Self {
        Self {
            seq: next_seq(),
            timestamp: Utc::now(),
            severity,
            logger: logger.into(),
            message: message.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            error: None,
            context: HashMap::new(),
            correlation_id: None,
        }
    }

    /// 오류 정보 부착
    pub fn with_error(mut self, error: CapturedError) -> Self {
        self.error = Some(error);
        self
    }

    /// 컨텍스트 스냅샷과 상관 ID 부착
    pub fn with_context(
        mut self,
        correlation_id: impl Into<String>,
        snapshot: HashMap<String, String>,
    ) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self.context = snapshot;
        self
    }

    /// 로거 이름의 첫 번째 점 구분 세그먼트 (백엔드 파일 분류용)
    pub fn category(&self) -> &str {
        self.logger.split('.').next().unwrap_or("app")
    }

    /// `{}` 자리 표시자를 인자로 순서대로 치환한 메시지
    ///
    /// 인자가 부족하면 남은 자리 표시자는 그대로 유지됩니다.
    pub fn rendered_message(&self) -> String {
        if self.args.is_empty() || !self.message.contains("{}") {
            return self.message.clone();
        }

        let mut rendered = String::with_capacity(self.message.len() + 16);
        let mut parts = self.message.split("{}");
        if let Some(first) = parts.next() {
            rendered.push_str(first);
        }

        let mut args = self.args.iter();
        for part in parts {
            match args.next() {
                Some(arg) => rendered.push_str(arg),
                None => rendered.push_str("{}"),
            }
            rendered.push_str(part);
        }

        rendered
    }
}

/// 이벤트 포매터
pub struct EventFormatter {
    /// JSON 형식 사용 여부
    json_format: bool,
    /// 색상 출력 여부
    colored_output: bool,
}

impl EventFormatter {
    /// 새 포매터 생성
    pub fn new(json_format: bool, colored_output: bool) -> Self {
        Self {
            json_format,
            colored_output,
        }
    }

    /// 이벤트를 문자열로 포매팅 (개행 미포함)
    pub fn format(&self, event: &LogEvent) -> Result<String, PipelineError> {
        if self.json_format {
            self.format_json(event)
        } else {
            Ok(self.format_text(event))
        }
    }

    /// JSON 형식으로 포매팅
    fn format_json(&self, event: &LogEvent) -> Result<String, PipelineError> {
        let json_str = serde_json::to_string(event)?;
        Ok(json_str)
    }

    /// 텍스트 형식으로 포매팅
    fn format_text(&self, event: &LogEvent) -> String {
        let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let level_str = if self.colored_output {
            format!(
                "{}[{}]{}",
                event.severity.color_code(),
                event.severity.as_str(),
                "\x1b[0m" // 색상 리셋
            )
        } else {
            format!("[{}]", event.severity.as_str())
        };

        let mut formatted = format!(
            "{} {} [{}] {}",
            timestamp,
            level_str,
            event.logger,
            event.rendered_message()
        );

        // 상관 ID와 컨텍스트 데이터 추가
        let mut pairs: Vec<String> = Vec::new();
        if let Some(cid) = &event.correlation_id {
            pairs.push(format!("cid={}", cid));
        }
        let mut keys: Vec<&String> = event.context.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(value) = event.context.get(key) {
                pairs.push(format!("{}={}", key, value));
            }
        }
        if !pairs.is_empty() {
            formatted.push_str(&format!(" [{}]", pairs.join(" ")));
        }

        // 오류 블록 추가
        if let Some(error) = &event.error {
            formatted.push_str(&format!(" | error: {}", error.message));
            for line in error.continuation_lines() {
                formatted.push('\n');
                formatted.push_str(&line);
            }
        }

        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_as_str() {
        assert_eq!(Severity::Trace.as_str(), "TRACE");
        assert_eq!(Severity::Debug.as_str(), "DEBUG");
        assert_eq!(Severity::Info.as_str(), "INFO");
        assert_eq!(Severity::Warn.as_str(), "WARN");
        assert_eq!(Severity::Error.as_str(), "ERROR");
        assert_eq!(Severity::Fatal.as_str(), "FATAL");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_severity_u8_roundtrip() {
        for severity in [
            Severity::Trace,
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ] {
            assert_eq!(Severity::from_u8(severity.as_u8()), severity);
        }
        assert_eq!(Severity::from_u8(99), Severity::Fatal);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("ERROR".parse(), Ok(Severity::Error));
        assert_eq!("error".parse(), Ok(Severity::Error));
        assert_eq!("INVALID".parse::<Severity>(), Err(()));
    }

    #[test]
    fn test_seq_is_monotonic() {
        let first = LogEvent::new(Severity::Info, "app", "one", &[]);
        let second = LogEvent::new(Severity::Info, "app", "two", &[]);
        assert!(second.seq > first.seq);
    }

    #[test]
    fn test_rendered_message_substitution() {
        let event = LogEvent::new(
            Severity::Info,
            "app.db",
            "query {} took {}ms",
            &["users", "42"],
        );
        assert_eq!(event.rendered_message(), "query users took 42ms");
    }

    #[test]
    fn test_rendered_message_missing_args() {
        let event = LogEvent::new(Severity::Info, "app", "{} and {}", &["left"]);
        assert_eq!(event.rendered_message(), "left and {}");
    }

    #[test]
    fn test_category_from_logger_name() {
        let event = LogEvent::new(Severity::Info, "app.db.pool", "msg", &[]);
        assert_eq!(event.category(), "app");

        let flat = LogEvent::new(Severity::Info, "worker", "msg", &[]);
        assert_eq!(flat.category(), "worker");
    }

    #[test]
    fn test_formatter_text() {
        let formatter = EventFormatter::new(false, false);
        let mut snapshot = HashMap::new();
        snapshot.insert("attempt".to_string(), "2".to_string());

        let event = LogEvent::new(Severity::Warn, "app.net", "retrying {}", &["peer-1"])
            .with_context("cid-123", snapshot);

        let formatted = formatter.format(&event).unwrap();
        assert!(formatted.contains("[WARN]"));
        assert!(formatted.contains("[app.net]"));
        assert!(formatted.contains("retrying peer-1"));
        assert!(formatted.contains("cid=cid-123"));
        assert!(formatted.contains("attempt=2"));
    }

    #[test]
    fn test_formatter_json() {
        let formatter = EventFormatter::new(true, false);
        let event = LogEvent::new(Severity::Info, "app", "Test message", &[]);

        let formatted = formatter.format(&event).unwrap();
        assert!(formatted.contains("\"severity\":\"Info\""));
        assert!(formatted.contains("\"logger\":\"app\""));
        assert!(formatted.contains("\"message\":\"Test message\""));
    }

    #[test]
    fn test_error_block_lines() {
        let formatter = EventFormatter::new(false, false);
        let error = CapturedError::new("TimeoutError: connection timed out")
            .with_stack_trace("service::call\nCaused by: socket closed");
        let event = LogEvent::new(Severity::Error, "app.net", "request failed", &[])
            .with_error(error);

        let formatted = formatter.format(&event).unwrap();
        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("error: TimeoutError: connection timed out"));
        assert_eq!(lines[1], "    at service::call");
        assert_eq!(lines[2], "Caused by: socket closed");
    }

    #[test]
    fn test_captured_error_from_error_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged");
        let outer = anyhow::Error::from(inner).context("flush failed");

        let captured = CapturedError::from_error(outer.as_ref());
        assert_eq!(captured.message, "flush failed");
        let trace = captured.stack_trace.unwrap();
        assert!(trace.contains("Caused by: disk unplugged"));
    }
}
