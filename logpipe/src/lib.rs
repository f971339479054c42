//! Adaptive Logging Pipeline Library
//!
//! 이 라이브러리는 비차단 방출과 이중 기록 보장을 갖춘 적응형 로깅
//! 파이프라인을 제공합니다. 호출 측은 이벤트를 큐에 넣고 즉시 돌아오며,
//! 기록과 순환, 분석은 전부 배경 태스크가 처리합니다.
//!
//! # 주요 기능
//!
//! - **비차단 방출**: 유계 큐 + 배치 전달, 호출 스레드는 기다리지 않음
//! - **이중 보장**: ERROR 이상 이벤트는 큐와 무관하게 직접 기록 파일에도 남음
//! - **메모리 적응**: 메모리 사용률에 따라 로그 임계값을 자동 상향/복원
//! - **파일 순환**: 날짜별 gzip 아카이브, 크기 기반 제자리 순환, 보관 정책
//! - **분석/감시**: 야간 분석 리포트 생성과 치명적 오류 알림
//!
//! # 사용 예시
//!
//! ```rust,no_run
//! use logpipe::{init_global_pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. 환경 변수에서 설정 로드
//!     let config = PipelineConfig::from_env();
//!
//!     // 2. 전역 파이프라인 초기화 (배경 태스크 기동 포함)
//!     let pipeline = init_global_pipeline(config).await?;
//!
//!     // 3. 이름 붙은 로거로 이벤트 방출
//!     let logger = pipeline.logger("app.db");
//!     logger.info("연결 풀 준비 완료, 크기 {}", &["32"]);
//!     logger.error("쿼리 실패: {}", &["timeout"]);
//!
//!     // 4. 종료 시 남은 큐를 전부 비우고 정리
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # 상관 컨텍스트
//!
//! 요청 단위 추적 정보는 명시적인 컨텍스트 객체로 건네줍니다:
//!
//! ```rust,no_run
//! use logpipe::{CorrelationContext, LogPipeline};
//! use std::sync::Arc;
//!
//! # async fn example(pipeline: Arc<LogPipeline>) {
//! let context = CorrelationContext::new();
//! context.put("request_id", "req-7");
//! context.put("user_id", "u-1042");
//!
//! // 핸들 복제본들은 같은 컨텍스트 저장소를 공유함
//! let logger = pipeline.logger("app.api").with_context(context.clone());
//! logger.warn("응답 지연 {}ms", &["850"]);
//! # }
//! ```

// 핵심 모듈들
pub mod alert;
pub mod analyzer;
pub mod batch;
pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod fallback;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod rotation;
pub mod sink;

// 편의를 위한 재출력
pub use alert::{
    AlertDispatcher, AlertMessage, AlertTransport, LogAlertTransport, MemoryAlertTransport,
};
pub use analyzer::{AnalysisReport, LogAnalyzer, OperationStats};
pub use config::{AlertConfig, PipelineConfig};
pub use context::CorrelationContext;
pub use error::PipelineError;
pub use event::{CapturedError, EventFormatter, LogEvent, Severity};
pub use fallback::DirectLogWriter;
pub use memory::{EffectiveThreshold, MemoryMonitor, ThresholdDecision};
pub use monitor::{CriticalBlock, LogMonitor};
pub use pipeline::{
    global_pipeline, init_global_pipeline, metrics_text, LogPipeline, LoggerHandle, PipelineState,
    PipelineStats,
};
pub use queue::{EventQueue, QueueEntry};
pub use rotation::{RotationManager, RotationSummary};
pub use sink::{AsyncFileWriter, BackendSink, FileSink, MemorySink};

/// 라이브러리 버전 정보
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn severity_reexport_is_usable() {
        assert!(Severity::Error > Severity::Warn);
    }
}
