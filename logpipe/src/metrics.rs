//! Prometheus 메트릭 수집
//!
//! 파이프라인 운영 지표를 수집하고 노출하는 모듈입니다.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_gauge, Encoder, Gauge, IntCounter,
    IntGauge, TextEncoder,
};

use crate::event::Severity;

lazy_static! {
    // 수집 경로 메트릭
    pub static ref EVENTS_ENQUEUED: IntCounter = register_int_counter!(
        "logpipe_events_enqueued_total",
        "Total number of events accepted into the async queue"
    )
    .expect("Failed to register enqueued counter");

    pub static ref EVENTS_DISPATCHED: IntCounter = register_int_counter!(
        "logpipe_events_dispatched_total",
        "Total number of events dispatched to the backend sink"
    )
    .expect("Failed to register dispatched counter");

    pub static ref EVENTS_DROPPED_QUEUE_FULL: IntCounter = register_int_counter!(
        "logpipe_events_dropped_queue_full_total",
        "Total number of events dropped because the queue was full"
    )
    .expect("Failed to register queue-full drop counter");

    pub static ref EVENTS_DROPPED_THRESHOLD: IntCounter = register_int_counter!(
        "logpipe_events_dropped_threshold_total",
        "Total number of events dropped below the effective severity threshold"
    )
    .expect("Failed to register threshold drop counter");

    pub static ref FALLBACK_WRITES: IntCounter = register_int_counter!(
        "logpipe_fallback_writes_total",
        "Total number of synchronous fallback writes"
    )
    .expect("Failed to register fallback writes counter");

    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "logpipe_queue_depth",
        "Current number of entries waiting in the async queue"
    )
    .expect("Failed to register queue depth gauge");

    // 배치 처리 메트릭
    pub static ref BATCH_RUNS: IntCounter = register_int_counter!(
        "logpipe_batch_runs_total",
        "Total number of batch drain runs"
    )
    .expect("Failed to register batch runs counter");

    pub static ref DISPATCH_FAILURES: IntCounter = register_int_counter!(
        "logpipe_dispatch_failures_total",
        "Total number of failed dispatches to the backend sink"
    )
    .expect("Failed to register dispatch failures counter");

    // 메모리 모니터 메트릭
    pub static ref MEMORY_USAGE_RATIO: Gauge = register_gauge!(
        "logpipe_memory_usage_ratio",
        "Last sampled memory usage ratio (0-1)"
    )
    .expect("Failed to register memory usage gauge");

    pub static ref EFFECTIVE_THRESHOLD: IntGauge = register_int_gauge!(
        "logpipe_effective_threshold",
        "Current effective severity threshold (0=TRACE .. 5=FATAL)"
    )
    .expect("Failed to register effective threshold gauge");

    // 순환/보관 메트릭
    pub static ref FILES_ARCHIVED: IntCounter = register_int_counter!(
        "logpipe_files_archived_total",
        "Total number of log files compressed into the archive"
    )
    .expect("Failed to register archived files counter");

    pub static ref ARCHIVES_DELETED: IntCounter = register_int_counter!(
        "logpipe_archives_deleted_total",
        "Total number of archive files deleted by retention"
    )
    .expect("Failed to register deleted archives counter");

    pub static ref ROTATION_FAILURES: IntCounter = register_int_counter!(
        "logpipe_rotation_failures_total",
        "Total number of files skipped by rotation due to I/O failures"
    )
    .expect("Failed to register rotation failures counter");

    // 분석/알림 메트릭
    pub static ref ANALYSIS_RUNS: IntCounter = register_int_counter!(
        "logpipe_analysis_runs_total",
        "Total number of completed log analysis runs"
    )
    .expect("Failed to register analysis runs counter");

    pub static ref ALERTS_SENT: IntCounter = register_int_counter!(
        "logpipe_alerts_sent_total",
        "Total number of alerts handed to the transport"
    )
    .expect("Failed to register alerts sent counter");

    pub static ref ALERT_FAILURES: IntCounter = register_int_counter!(
        "logpipe_alert_failures_total",
        "Total number of alert transport failures"
    )
    .expect("Failed to register alert failures counter");
}

/// 메트릭 헬퍼
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// 큐 수용 기록
    pub fn record_enqueued() {
        EVENTS_ENQUEUED.inc();
    }

    /// 싱크 전달 기록
    pub fn record_dispatched(count: u64) {
        EVENTS_DISPATCHED.inc_by(count);
    }

    /// 큐 포화 드롭 기록
    pub fn record_drop_queue_full() {
        EVENTS_DROPPED_QUEUE_FULL.inc();
    }

    /// 임계값 미달 드롭 기록
    pub fn record_drop_below_threshold() {
        EVENTS_DROPPED_THRESHOLD.inc();
    }

    /// 폴백 기록 횟수 증가
    pub fn record_fallback_write() {
        FALLBACK_WRITES.inc();
    }

    /// 큐 깊이 갱신
    pub fn set_queue_depth(depth: usize) {
        QUEUE_DEPTH.set(depth as i64);
    }

    /// 배치 실행 기록
    pub fn record_batch_run() {
        BATCH_RUNS.inc();
    }

    /// 싱크 전달 실패 기록
    pub fn record_dispatch_failure() {
        DISPATCH_FAILURES.inc();
    }

    /// 메모리 사용 비율 갱신
    pub fn set_memory_usage_ratio(ratio: f64) {
        MEMORY_USAGE_RATIO.set(ratio);
    }

    /// 유효 임계값 갱신
    pub fn set_effective_threshold(severity: Severity) {
        EFFECTIVE_THRESHOLD.set(severity.as_u8() as i64);
    }

    /// 아카이브 생성 기록
    pub fn record_file_archived() {
        FILES_ARCHIVED.inc();
    }

    /// 보관 정책 삭제 기록
    pub fn record_archives_deleted(count: u64) {
        ARCHIVES_DELETED.inc_by(count);
    }

    /// 순환 중 건너뛴 실패 기록
    pub fn record_rotation_failure() {
        ROTATION_FAILURES.inc();
    }

    /// 분석 실행 기록
    pub fn record_analysis_run() {
        ANALYSIS_RUNS.inc();
    }

    /// 알림 전송 기록
    pub fn record_alert_sent() {
        ALERTS_SENT.inc();
    }

    /// 알림 실패 기록
    pub fn record_alert_failure() {
        ALERT_FAILURES.inc();
    }

    /// Prometheus 메트릭을 텍스트 형식으로 수집
    pub fn gather_metrics() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        PipelineMetrics::record_enqueued();
        PipelineMetrics::record_dispatched(3);
        PipelineMetrics::record_drop_queue_full();
        PipelineMetrics::set_queue_depth(7);
        PipelineMetrics::set_memory_usage_ratio(0.42);

        let metrics_text = PipelineMetrics::gather_metrics().expect("Failed to gather metrics");
        assert!(metrics_text.contains("logpipe_events_enqueued_total"));
        assert!(metrics_text.contains("logpipe_events_dispatched_total"));
        assert!(metrics_text.contains("logpipe_queue_depth"));
        assert!(metrics_text.contains("logpipe_memory_usage_ratio"));
    }

    #[test]
    fn test_effective_threshold_gauge_is_exported() {
        PipelineMetrics::set_effective_threshold(Severity::Error);

        let metrics_text = PipelineMetrics::gather_metrics().expect("Failed to gather metrics");
        assert!(metrics_text.contains("logpipe_effective_threshold"));
    }
}
