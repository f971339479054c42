//! 로그 파이프라인 파사드
//!
//! 이벤트 방출, 비동기 배치 전달, 메모리 적응 임계값, 파일 순환, 분석,
//! 치명적 오류 감시를 하나의 수명 주기로 묶습니다.
//!
//! - `emit()`은 동기적으로 큐에 넣고 즉시 반환함
//! - ERROR 이상 이벤트는 큐와 무관하게 직접 기록 파일에도 남음
//! - `start()`가 배경 태스크들을 띄우고 `shutdown()`이 전부 정리함
//! - 전역 파이프라인은 한 번만 초기화 가능

use anyhow::{Context, Result};
use chrono::{Timelike, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::alert::{AlertDispatcher, AlertTransport, LogAlertTransport};
use crate::analyzer::{AnalysisReport, LogAnalyzer};
use crate::batch::BatchProcessor;
use crate::config::PipelineConfig;
use crate::context::CorrelationContext;
use crate::error::PipelineError;
use crate::event::{CapturedError, EventFormatter, LogEvent, Severity};
use crate::fallback::{DirectLogWriter, DIRECT_LOG_FILE};
use crate::memory::{EffectiveThreshold, MemoryMonitor, ThresholdDecision};
use crate::metrics::PipelineMetrics;
use crate::monitor::LogMonitor;
use crate::queue::{EventQueue, QueueEntry};
use crate::rotation::{RotationManager, RotationSummary};
use crate::sink::{BackendSink, FileSink};

/// 파이프라인 수명 주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// 생성됨, 배경 태스크 미기동 (emit은 큐에 쌓임)
    Idle,
    /// 배경 태스크 동작 중
    Running,
    /// 종료됨 (emit은 직접 기록 경로로만)
    Shutdown,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

/// 파이프라인 누적 통계 스냅샷
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// 큐에 들어간 이벤트 수
    pub enqueued: u64,
    /// 싱크로 전달된 이벤트 수
    pub dispatched: u64,
    /// 큐 포화로 버려진 이벤트 수
    pub dropped_queue_full: u64,
    /// 임계값 미달로 버려진 이벤트 수
    pub dropped_below_threshold: u64,
    /// 직접 기록 파일에 쓰인 이벤트 수
    pub fallback_writes: u64,
    /// 싱크 전달 실패 수
    pub dispatch_failures: u64,
    /// 현재 큐 길이
    pub queue_depth: usize,
    /// 현재 유효 임계값
    pub effective_threshold: Severity,
}

/// 로그 파이프라인
pub struct LogPipeline {
    config: PipelineConfig,
    queue: Arc<EventQueue>,
    sink: Arc<dyn BackendSink>,
    batch: Arc<BatchProcessor>,
    threshold: Arc<EffectiveThreshold>,
    memory: MemoryMonitor,
    fallback: Arc<DirectLogWriter>,
    rotation: RotationManager,
    analyzer: LogAnalyzer,
    monitor: LogMonitor,
    alert: AlertDispatcher,
    state: AtomicU8,
    dropped_below_threshold: AtomicU64,
    fallback_writes: AtomicU64,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    latest_report: parking_lot::RwLock<Option<AnalysisReport>>,
}

impl LogPipeline {
    /// 파일 싱크로 파이프라인 생성
    ///
    /// 로그 디렉토리를 초기화하고 비동기 파일 작성기를 띄웁니다.
    pub async fn new(config: PipelineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let rotation = RotationManager::new(&config);
        rotation
            .initialize_directories()
            .await
            .context("로그 디렉토리 초기화 실패")?;

        let sink: Arc<dyn BackendSink> = Arc::new(
            FileSink::new(&config)
                .await
                .context("파일 싱크 생성 실패")?,
        );
        Self::assemble(config, sink, Arc::new(LogAlertTransport))
    }

    /// 지정한 싱크로 파이프라인 생성
    ///
    /// 커스텀 백엔드를 붙이거나 테스트에서 메모리 싱크를 쓸 때 사용합니다.
    pub async fn with_sink(
        config: PipelineConfig,
        sink: Arc<dyn BackendSink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Self::assemble(config, sink, Arc::new(LogAlertTransport))
    }

    /// 싱크와 알림 전송 경로를 모두 지정해 파이프라인 생성
    pub async fn with_sink_and_transport(
        config: PipelineConfig,
        sink: Arc<dyn BackendSink>,
        transport: Arc<dyn AlertTransport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Self::assemble(config, sink, transport)
    }

    /// 구성 요소 조립
    fn assemble(
        config: PipelineConfig,
        sink: Arc<dyn BackendSink>,
        transport: Arc<dyn AlertTransport>,
    ) -> Result<Arc<Self>> {
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let batch = Arc::new(BatchProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&sink),
            config.batch_size,
        ));
        let threshold = Arc::new(EffectiveThreshold::new(config.min_severity));
        let memory = MemoryMonitor::new(Arc::clone(&threshold), &config);

        // 직접 기록 경로는 항상 평문 텍스트 (감시기가 타임스탬프를 읽을 수 있도록)
        let fallback = Arc::new(DirectLogWriter::new(
            config.base_dir.join(DIRECT_LOG_FILE),
            EventFormatter::new(false, false),
        ));

        // 순환과 분석의 파일별 실패도 직접 기록 경로에 남도록 폴백을 공유
        let rotation = RotationManager::new(&config).with_fallback(Arc::clone(&fallback));
        let analyzer = LogAnalyzer::new(&config).with_fallback(Arc::clone(&fallback));
        let monitor = LogMonitor::new(&config);
        let alert = AlertDispatcher::with_transport(config.alert.clone(), transport);
        let (stop_tx, _) = watch::channel(false);

        PipelineMetrics::set_effective_threshold(config.min_severity);
        info!(
            base_dir = %config.base_dir.display(),
            queue_capacity = config.queue_capacity,
            batch_size = config.batch_size,
            min_severity = config.min_severity.as_str(),
            "로그 파이프라인 생성됨"
        );

        Ok(Arc::new(Self {
            config,
            queue,
            sink,
            batch,
            threshold,
            memory,
            fallback,
            rotation,
            analyzer,
            monitor,
            alert,
            state: AtomicU8::new(STATE_IDLE),
            dropped_below_threshold: AtomicU64::new(0),
            fallback_writes: AtomicU64::new(0),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            latest_report: parking_lot::RwLock::new(None),
        }))
    }

    /// 현재 수명 주기 상태
    pub fn state(&self) -> PipelineState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => PipelineState::Running,
            STATE_SHUTDOWN => PipelineState::Shutdown,
            _ => PipelineState::Idle,
        }
    }

    /// 현재 유효 심각도 임계값
    pub fn effective_threshold(&self) -> Severity {
        self.threshold.get()
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 가장 최근 분석 리포트
    pub fn latest_report(&self) -> Option<AnalysisReport> {
        self.latest_report.read().clone()
    }

    /// 가장 최근 분석 리포트의 핵심 수치 요약
    ///
    /// 아직 분석이 한 번도 수행되지 않았으면 None을 반환합니다.
    pub fn analysis_summary(&self) -> Option<HashMap<String, String>> {
        self.latest_report
            .read()
            .as_ref()
            .map(AnalysisReport::summary)
    }

    /// 누적 통계 스냅샷
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            enqueued: self.queue.enqueued_total(),
            dispatched: self.batch.dispatched_total(),
            dropped_queue_full: self.queue.dropped_total(),
            dropped_below_threshold: self.dropped_below_threshold.load(Ordering::Relaxed),
            fallback_writes: self.fallback_writes.load(Ordering::Relaxed),
            dispatch_failures: self.batch.failures_total(),
            queue_depth: self.queue.len(),
            effective_threshold: self.threshold.get(),
        }
    }

    /// 이벤트 방출 (동기, 즉시 반환)
    ///
    /// 큐에 들어갔으면 true를 반환합니다. 임계값 미달이거나 큐가 가득 찼거나
    /// 파이프라인이 종료된 경우 false를 반환합니다. ERROR 이상 이벤트는
    /// 어떤 경우에도 직접 기록 파일에 먼저 남습니다.
    pub fn emit(&self, event: LogEvent) -> bool {
        if self.state.load(Ordering::Acquire) == STATE_SHUTDOWN {
            // 종료 후에도 ERROR 이상은 직접 기록 경로로 보존
            if event.severity >= Severity::Error && self.fallback.write_event(&event) {
                self.fallback_writes.fetch_add(1, Ordering::Relaxed);
                PipelineMetrics::record_fallback_write();
            }
            return false;
        }

        if !self.threshold.allows(event.severity) {
            self.dropped_below_threshold.fetch_add(1, Ordering::Relaxed);
            PipelineMetrics::record_drop_below_threshold();
            return false;
        }

        if event.severity >= Severity::Error && self.fallback.write_event(&event) {
            self.fallback_writes.fetch_add(1, Ordering::Relaxed);
            PipelineMetrics::record_fallback_write();
        }

        self.queue.push(QueueEntry::new(event, self.sink.name()))
    }

    /// 상관 컨텍스트를 붙여 이벤트 방출
    ///
    /// 방출 시점의 컨텍스트 스냅샷이 이벤트에 복사되므로 이후의 컨텍스트
    /// 변경은 이미 방출된 이벤트에 영향을 주지 않습니다.
    pub fn emit_with(&self, context: &CorrelationContext, event: LogEvent) -> bool {
        self.emit(event.with_context(context.id(), context.snapshot()))
    }

    /// 이름 붙은 로거 핸들 생성
    pub fn logger(self: &Arc<Self>, name: impl Into<String>) -> LoggerHandle {
        LoggerHandle {
            pipeline: Arc::clone(self),
            name: name.into(),
            context: None,
        }
    }

    /// 배경 태스크 기동
    ///
    /// 배치 플러시, 메모리 감시, 일일/크기 순환, 야간 분석, 치명적 오류
    /// 감시 태스크를 띄웁니다. Idle 상태에서만 호출할 수 있습니다.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_IDLE,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(
                PipelineError::Lifecycle("이미 시작되었거나 종료된 파이프라인입니다".to_string())
                    .into(),
            );
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_batch_task());
        tasks.push(self.spawn_memory_task());
        tasks.push(self.spawn_daily_rotation_task());
        tasks.push(self.spawn_size_check_task());
        tasks.push(self.spawn_analysis_task());
        if self.config.alert.enabled {
            tasks.push(self.spawn_monitor_task());
        }

        info!(tasks = tasks.len(), "로그 파이프라인 배경 태스크 기동됨");
        Ok(())
    }

    /// 주기 배치 플러시 태스크
    fn spawn_batch_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(pipeline.config.flush_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // 배치 크기만큼 가득 찼으면 큐가 줄 때까지 반복
                        loop {
                            let dispatched = pipeline.batch.run_once().await;
                            if dispatched < pipeline.config.batch_size {
                                break;
                            }
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("배치 플러시 태스크 종료");
        })
    }

    /// 메모리 사용률 감시 태스크
    fn spawn_memory_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker = interval(pipeline.config.memory_sample_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ratio = pipeline.memory.sample_system(&mut system);
                        pipeline.apply_memory_sample(ratio);
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("메모리 감시 태스크 종료");
        })
    }

    /// 자정 일일 순환 태스크
    fn spawn_daily_rotation_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_hour(0);
                tokio::select! {
                    _ = sleep(wait) => {
                        if let Err(e) = pipeline.run_rotation_now().await {
                            pipeline.note_background_failure("일일 순환 실패", &e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("일일 순환 태스크 종료");
        })
    }

    /// 활성 파일 크기 점검 태스크
    fn spawn_size_check_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(pipeline.config.size_check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match pipeline.rotation.check_active_file_size().await {
                            Ok(rotated) if !rotated.is_empty() => {
                                if let Err(e) = pipeline.rotation.enforce_retention().await {
                                    pipeline.note_background_failure("보관 정책 적용 실패", &e);
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                pipeline.note_background_failure("활성 파일 크기 점검 실패", &e)
                            }
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("크기 점검 태스크 종료");
        })
    }

    /// 야간 로그 분석 태스크
    fn spawn_analysis_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_hour(pipeline.config.analysis_hour);
                tokio::select! {
                    _ = sleep(wait) => {
                        let Some(date) = Utc::now().date_naive().pred_opt() else {
                            continue;
                        };
                        if let Err(e) = pipeline.run_analysis_now(date).await {
                            pipeline.note_background_failure("야간 로그 분석 실패", &e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("로그 분석 태스크 종료");
        })
    }

    /// 치명적 오류 감시 태스크
    fn spawn_monitor_task(self: &Arc<Self>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(pipeline.config.alert.check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = pipeline.manual_check_and_alert().await {
                            pipeline.note_background_failure("치명적 오류 감시 실패", &e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("치명적 오류 감시 태스크 종료");
        })
    }

    /// 배경 작업 실패를 추적 로그와 직접 기록 파일 양쪽에 남김
    fn note_background_failure(&self, what: &str, error: &anyhow::Error) {
        error!(error = %error, "{}", what);
        self.fallback.write_event(&LogEvent::new(
            Severity::Error,
            "logpipe.tasks",
            format!("{}: {}", what, error),
            &[],
        ));
    }

    /// 메모리 사용률 표본 반영 (수동 트리거 겸용)
    pub fn apply_memory_sample(&self, ratio: f64) -> ThresholdDecision {
        self.memory.apply_sample(ratio)
    }

    /// 큐를 비울 때까지 배치 전달 수행 (수동 트리거)
    pub async fn flush_now(&self) -> usize {
        self.batch.flush_now().await
    }

    /// 일일 순환과 보관 정책을 즉시 수행 (수동 트리거)
    pub async fn run_rotation_now(&self) -> Result<RotationSummary> {
        let summary = self.rotation.rotate_daily().await?;
        self.rotation.enforce_retention().await?;
        Ok(summary)
    }

    /// 지정 날짜의 로그 분석을 즉시 수행 (수동 트리거)
    ///
    /// 생성된 리포트는 `latest_report()`로도 조회할 수 있습니다.
    pub async fn run_analysis_now(&self, date: chrono::NaiveDate) -> Result<AnalysisReport> {
        let (report, _path) = self.analyzer.generate_report(date).await?;
        *self.latest_report.write() = Some(report.clone());
        Ok(report)
    }

    /// 치명적 오류 검사를 즉시 수행 (수동 트리거)
    ///
    /// 미전달분을 먼저 플러시한 뒤 파일을 훑고, 발견된 블록 수를 반환합니다.
    /// 알림 전송 실패는 기록만 하고 검사 결과에는 영향을 주지 않습니다.
    pub async fn manual_check_and_alert(&self) -> Result<usize> {
        self.batch.flush_now().await;
        if let Err(e) = self.sink.flush().await {
            warn!(error = %e, "감시 전 싱크 플러시 실패");
        }

        let blocks = self.monitor.check_for_critical_errors().await?;
        if !blocks.is_empty() {
            if let Err(e) = self.alert.dispatch_critical(&blocks).await {
                error!(error = %e, count = blocks.len(), "치명적 오류 알림 전송 실패");
            }
        }
        Ok(blocks.len())
    }

    /// 파이프라인 종료
    ///
    /// 배경 태스크를 멈추고 남은 큐를 전부 전달한 뒤 싱크를 닫습니다.
    /// 두 번째 호출부터는 아무 일도 하지 않습니다.
    pub async fn shutdown(&self) -> Result<()> {
        let previous = self.state.swap(STATE_SHUTDOWN, Ordering::AcqRel);
        if previous == STATE_SHUTDOWN {
            return Ok(());
        }

        let _ = self.stop_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "배경 태스크 종료 대기 실패");
            }
        }

        let drained = self.batch.flush_now().await;
        self.sink
            .shutdown()
            .await
            .context("싱크 종료 실패")?;

        let stats = self.stats();
        info!(
            drained = drained,
            enqueued = stats.enqueued,
            dispatched = stats.dispatched,
            dropped_queue_full = stats.dropped_queue_full,
            dropped_below_threshold = stats.dropped_below_threshold,
            "로그 파이프라인 종료 완료"
        );
        Ok(())
    }
}

/// 이름 붙은 로거 핸들
///
/// 파이프라인에 대한 얇은 핸들로, 로거 이름과 선택적 상관 컨텍스트를
/// 이벤트에 채워서 방출합니다. 복제 비용이 낮아 자유롭게 건네줄 수 있습니다.
#[derive(Clone)]
pub struct LoggerHandle {
    pipeline: Arc<LogPipeline>,
    name: String,
    context: Option<CorrelationContext>,
}

impl LoggerHandle {
    /// 상관 컨텍스트를 붙인 핸들 반환
    pub fn with_context(mut self, context: CorrelationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// 붙어 있는 상관 컨텍스트
    pub fn context(&self) -> Option<&CorrelationContext> {
        self.context.as_ref()
    }

    /// 로거 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, severity: Severity, message: &str, args: &[&str]) -> bool {
        let event = LogEvent::new(severity, self.name.clone(), message, args);
        match &self.context {
            Some(context) => self.pipeline.emit_with(context, event),
            None => self.pipeline.emit(event),
        }
    }

    fn submit_with_error(
        &self,
        severity: Severity,
        message: &str,
        args: &[&str],
        error: CapturedError,
    ) -> bool {
        let event = LogEvent::new(severity, self.name.clone(), message, args).with_error(error);
        match &self.context {
            Some(context) => self.pipeline.emit_with(context, event),
            None => self.pipeline.emit(event),
        }
    }

    pub fn trace(&self, message: &str, args: &[&str]) -> bool {
        self.submit(Severity::Trace, message, args)
    }

    pub fn debug(&self, message: &str, args: &[&str]) -> bool {
        self.submit(Severity::Debug, message, args)
    }

    pub fn info(&self, message: &str, args: &[&str]) -> bool {
        self.submit(Severity::Info, message, args)
    }

    pub fn warn(&self, message: &str, args: &[&str]) -> bool {
        self.submit(Severity::Warn, message, args)
    }

    pub fn error(&self, message: &str, args: &[&str]) -> bool {
        self.submit(Severity::Error, message, args)
    }

    /// 오류 정보를 붙여 ERROR 이벤트 방출
    pub fn error_with(&self, message: &str, args: &[&str], error: CapturedError) -> bool {
        self.submit_with_error(Severity::Error, message, args, error)
    }

    pub fn fatal(&self, message: &str, args: &[&str]) -> bool {
        self.submit(Severity::Fatal, message, args)
    }

    /// 오류 정보를 붙여 FATAL 이벤트 방출
    pub fn fatal_with(&self, message: &str, args: &[&str], error: CapturedError) -> bool {
        self.submit_with_error(Severity::Fatal, message, args, error)
    }
}

/// 다음으로 돌아오는 지정 시각(UTC 정시)까지의 대기 시간
fn duration_until_next_hour(hour: u32) -> Duration {
    let now = Utc::now();
    let seconds_today = now.num_seconds_from_midnight() as i64;
    let target_seconds = (hour as i64) * 3600;

    let mut wait = target_seconds - seconds_today;
    if wait <= 0 {
        wait += 24 * 3600;
    }
    Duration::from_secs(wait as u64)
}

/// 전역 파이프라인
static GLOBAL_PIPELINE: OnceCell<Arc<LogPipeline>> = OnceCell::const_new();

/// 전역 파이프라인 초기화
///
/// 파이프라인을 생성하고 배경 태스크를 기동한 뒤 전역으로 등록합니다.
/// 두 번 호출하면 오류를 반환합니다.
pub async fn init_global_pipeline(config: PipelineConfig) -> Result<Arc<LogPipeline>> {
    let pipeline = LogPipeline::new(config).await?;
    pipeline.start().await?;

    if GLOBAL_PIPELINE.set(Arc::clone(&pipeline)).is_err() {
        // 등록에 실패한 중복 파이프라인은 배경 태스크까지 정리하고 거부
        pipeline.shutdown().await?;
        return Err(PipelineError::Lifecycle(
            "전역 파이프라인이 이미 초기화되었습니다".to_string(),
        )
        .into());
    }

    Ok(pipeline)
}

/// 전역 파이프라인 조회
///
/// 초기화 전에는 None을 반환합니다.
pub fn global_pipeline() -> Option<Arc<LogPipeline>> {
    GLOBAL_PIPELINE.get().cloned()
}

/// 프로메테우스 텍스트 형식의 파이프라인 메트릭
pub fn metrics_text() -> Result<String> {
    PipelineMetrics::gather_metrics().context("메트릭 수집 실패")
}
