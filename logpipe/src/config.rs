//! 파이프라인 설정 관리
//!
//! 로그 파이프라인의 설정 파라미터 정의와 환경변수 로드를 담당합니다.

use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::event::Severity;

/// 알림 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// 알림 활성화 여부 (기본값: false)
    pub enabled: bool,

    /// 알림 수신자 (예: 운영팀 메일 주소)
    pub recipient: Option<String>,

    /// 알림 제목 접두사 (기본값: "[logpipe]")
    pub subject_prefix: String,

    /// 알림 본문에 포함할 최대 오류 블록 수 (기본값: 10)
    pub max_errors_per_alert: usize,

    /// 치명적 오류 검사 간격 (기본값: 300초)
    pub check_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipient: None,
            subject_prefix: "[logpipe]".to_string(),
            max_errors_per_alert: 10,
            check_interval: Duration::from_secs(300),
        }
    }
}

/// 로그 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 기본 로그 디렉토리 (기본값: "./logs")
    pub base_dir: PathBuf,

    /// 메인 싱크 파일 이름 (기본값: "app.log")
    pub sink_file: String,

    /// 비동기 큐 용량 (기본값: 1000)
    pub queue_capacity: usize,

    /// 배치당 최대 처리 이벤트 수 (기본값: 50)
    pub batch_size: usize,

    /// 배치 플러시 간격 (기본값: 5초)
    pub flush_interval: Duration,

    /// 설정된 최소 심각도 (기본값: Trace)
    pub min_severity: Severity,

    /// JSON 형식 여부 (기본값: false)
    pub json_format: bool,

    /// 콘솔 에코 여부 (기본값: false)
    pub console_echo: bool,

    /// 크기 순환을 촉발하는 최대 파일 크기 (바이트, 기본값: 10MB)
    pub max_file_size: u64,

    /// 아카이브 보관 일수 (기본값: 7일)
    pub retention_days: u32,

    /// 아카이브 전체 크기 상한 (바이트, 기본값: 512MB)
    pub max_archive_bytes: u64,

    /// 크기 검사 간격 (기본값: 1시간)
    pub size_check_interval: Duration,

    /// 메모리 샘플링 간격 (기본값: 60초)
    pub memory_sample_interval: Duration,

    /// 메모리 고수위 임계값 (기본값: 0.85)
    pub memory_high_threshold: f64,

    /// 메모리 중수위 임계값 (기본값: 0.70)
    pub memory_medium_threshold: f64,

    /// 야간 분석 실행 시각 (UTC 시, 기본값: 1시)
    pub analysis_hour: u32,

    /// 알림 설정
    pub alert: AlertConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./logs"),
            sink_file: "app.log".to_string(),
            queue_capacity: 1000,
            batch_size: 50,
            flush_interval: Duration::from_secs(5),
            min_severity: Severity::Trace,
            json_format: false,
            console_echo: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
            retention_days: 7,
            max_archive_bytes: 512 * 1024 * 1024, // 512MB
            size_check_interval: Duration::from_secs(3600),
            memory_sample_interval: Duration::from_secs(60),
            memory_high_threshold: 0.85,
            memory_medium_threshold: 0.70,
            analysis_hour: 1,
            alert: AlertConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenv().ok(); // 기본 .env 파일 시도

        let mut config = Self::default();

        if let Ok(val) = std::env::var("LOG_BASE_DIR") {
            config.base_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("LOG_SINK_FILE") {
            config.sink_file = val;
        }

        if let Ok(val) = std::env::var("LOG_QUEUE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.queue_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("LOG_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("LOG_FLUSH_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                config.flush_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("LOG_MIN_SEVERITY") {
            if let Ok(severity) = val.parse::<Severity>() {
                config.min_severity = severity;
            }
        }

        if let Ok(val) = std::env::var("LOG_JSON_FORMAT") {
            config.json_format = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("LOG_CONSOLE_ECHO") {
            config.console_echo = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("LOG_MAX_FILE_SIZE") {
            if let Ok(size) = val.parse() {
                config.max_file_size = size;
            }
        }

        if let Ok(val) = std::env::var("LOG_RETENTION_DAYS") {
            if let Ok(days) = val.parse() {
                config.retention_days = days;
            }
        }

        if let Ok(val) = std::env::var("LOG_MAX_ARCHIVE_SIZE") {
            if let Ok(size) = val.parse() {
                config.max_archive_bytes = size;
            }
        }

        if let Ok(val) = std::env::var("LOG_SIZE_CHECK_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                config.size_check_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("LOG_MEMORY_SAMPLE_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                config.memory_sample_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("LOG_MEMORY_HIGH_THRESHOLD") {
            if let Ok(ratio) = val.parse() {
                config.memory_high_threshold = ratio;
            }
        }

        if let Ok(val) = std::env::var("LOG_MEMORY_MEDIUM_THRESHOLD") {
            if let Ok(ratio) = val.parse() {
                config.memory_medium_threshold = ratio;
            }
        }

        if let Ok(val) = std::env::var("LOG_ANALYSIS_HOUR") {
            if let Ok(hour) = val.parse() {
                config.analysis_hour = hour;
            }
        }

        if let Ok(val) = std::env::var("LOG_ALERT_ENABLED") {
            config.alert.enabled = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("LOG_ALERT_RECIPIENT") {
            config.alert.recipient = Some(val);
        }

        if let Ok(val) = std::env::var("LOG_ALERT_SUBJECT_PREFIX") {
            config.alert.subject_prefix = val;
        }

        if let Ok(val) = std::env::var("LOG_ALERT_MAX_ERRORS") {
            if let Ok(count) = val.parse() {
                config.alert.max_errors_per_alert = count;
            }
        }

        if let Ok(val) = std::env::var("LOG_ALERT_CHECK_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                config.alert.check_interval = Duration::from_secs(secs);
            }
        }

        config
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::config("queue_capacity must be greater than 0"));
        }

        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size must be greater than 0"));
        }

        if self.max_file_size == 0 {
            return Err(PipelineError::config("max_file_size must be greater than 0"));
        }

        if self.retention_days == 0 {
            return Err(PipelineError::config("retention_days must be greater than 0"));
        }

        if self.memory_high_threshold <= 0.0 || self.memory_high_threshold >= 1.0 {
            return Err(PipelineError::config(
                "memory_high_threshold must be between 0 and 1",
            ));
        }

        if self.memory_medium_threshold <= 0.0 || self.memory_medium_threshold >= 1.0 {
            return Err(PipelineError::config(
                "memory_medium_threshold must be between 0 and 1",
            ));
        }

        if self.memory_medium_threshold >= self.memory_high_threshold {
            return Err(PipelineError::config(
                "memory_medium_threshold must be lower than memory_high_threshold",
            ));
        }

        if self.analysis_hour >= 24 {
            return Err(PipelineError::config("analysis_hour must be between 0 and 23"));
        }

        if self.alert.max_errors_per_alert == 0 {
            return Err(PipelineError::config(
                "max_errors_per_alert must be greater than 0",
            ));
        }

        Ok(())
    }
}
