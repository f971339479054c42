//! 백엔드 싱크
//!
//! 배치 처리기가 이벤트를 전달하는 최종 목적지입니다.
//! - `FileSink`: 메인 로그 파일과 날짜/분류별 파일에 비동기 기록
//! - `MemorySink`: 테스트용 메모리 싱크
//!
//! 파일 기록은 명령 채널 뒤의 전용 태스크가 담당하므로 전달 호출은
//! 채널 송신 비용만 부담합니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::event::{EventFormatter, LogEvent};
use crate::queue::QueueEntry;

/// 백엔드 싱크 트레이트
#[async_trait]
pub trait BackendSink: Send + Sync {
    /// 싱크 이름 (큐 항목의 sink 필드에 기록)
    fn name(&self) -> &'static str;

    /// 이벤트를 싱크에 전달
    async fn dispatch(&self, entry: &QueueEntry) -> Result<()>;

    /// 버퍼링된 데이터 플러시 요청
    async fn flush(&self) -> Result<()>;

    /// 싱크 종료 및 리소스 정리
    async fn shutdown(&self) -> Result<()>;
}

/// 로그 작성 명령
#[derive(Debug)]
enum WriteCommand {
    /// 형식화된 라인 작성
    Write(String),
    /// 플러시 수행 후 완료 응답
    Flush(oneshot::Sender<()>),
    /// 작성기 종료
    Shutdown,
}

/// 비동기 파일 작성기
///
/// 명령 채널 뒤에서 단일 태스크가 버퍼링과 기록을 수행합니다.
pub struct AsyncFileWriter {
    /// 명령 전송 채널
    sender: mpsc::UnboundedSender<WriteCommand>,
    /// 작성기 핸들 (종료 대기용)
    writer_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AsyncFileWriter {
    /// 새 비동기 파일 작성기 생성
    pub async fn new(path: PathBuf, flush_interval: Duration) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();

        // 백그라운드 작성기 태스크 시작
        let writer_handle = tokio::spawn(Self::writer_task(path, receiver, flush_interval));

        Ok(Self {
            sender,
            writer_handle: parking_lot::Mutex::new(Some(writer_handle)),
        })
    }

    /// 형식화된 라인 작성 (논블로킹)
    pub fn write_line(&self, line: String) -> Result<()> {
        self.sender
            .send(WriteCommand::Write(line))
            .context("로그 작성 명령 전송 실패")?;
        Ok(())
    }

    /// 버퍼를 플러시하고 디스크 반영까지 대기
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender
            .send(WriteCommand::Flush(ack_tx))
            .context("플러시 명령 전송 실패")?;

        // 작성기가 먼저 종료되었다면 남은 버퍼는 종료 시점에 이미 플러시됨
        let _ = ack_rx.await;
        Ok(())
    }

    /// 작성기 종료 및 남은 데이터 플러시
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.sender.send(WriteCommand::Shutdown);

        let handle = self.writer_handle.lock().take();
        if let Some(handle) = handle {
            handle.await.context("작성기 태스크 종료 대기 실패")?;
        }

        debug!("비동기 파일 작성기 종료됨");
        Ok(())
    }

    /// 백그라운드 작성기 태스크
    async fn writer_task(
        path: PathBuf,
        mut receiver: mpsc::UnboundedReceiver<WriteCommand>,
        flush_interval: Duration,
    ) {
        let mut writer = match Self::create_writer(&path).await {
            Ok(w) => w,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "로그 파일 작성기 생성 실패"
                );
                return;
            }
        };

        let mut flush_interval = interval(flush_interval);
        let mut buffer = Vec::with_capacity(1024);
        let mut pending_writes = 0;

        loop {
            tokio::select! {
                // 명령 수신
                cmd = receiver.recv() => {
                    match cmd {
                        Some(WriteCommand::Write(line)) => {
                            buffer.extend_from_slice(line.as_bytes());
                            buffer.push(b'\n');
                            pending_writes += 1;

                            // 버퍼가 가득 차면 즉시 플러시
                            if pending_writes >= 100 || buffer.len() >= 64 * 1024 { // 64KB
                                if let Err(e) = Self::flush_buffer(&mut writer, &mut buffer).await {
                                    error!(error = %e, "로그 버퍼 플러시 실패");
                                }
                                pending_writes = 0;
                            }
                        }
                        Some(WriteCommand::Flush(ack)) => {
                            if let Err(e) = Self::flush_buffer(&mut writer, &mut buffer).await {
                                error!(error = %e, "로그 플러시 실패");
                            }
                            pending_writes = 0;
                            let _ = ack.send(());
                        }
                        Some(WriteCommand::Shutdown) => {
                            // 남은 데이터 플러시 후 종료
                            if let Err(e) = Self::flush_buffer(&mut writer, &mut buffer).await {
                                error!(error = %e, "종료 시 로그 플러시 실패");
                            }
                            debug!(path = %path.display(), "로그 작성기 태스크 종료");
                            return;
                        }
                        None => {
                            warn!("로그 작성기 채널이 닫힘");
                            return;
                        }
                    }
                }

                // 주기적 플러시
                _ = flush_interval.tick() => {
                    if pending_writes > 0 {
                        if let Err(e) = Self::flush_buffer(&mut writer, &mut buffer).await {
                            error!(error = %e, "주기적 로그 플러시 실패");
                        }
                        pending_writes = 0;
                    }
                }
            }
        }
    }

    /// 파일 작성기 생성
    async fn create_writer(path: &Path) -> Result<BufWriter<tokio::fs::File>> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("로그 디렉토리 생성 실패")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;

        Ok(BufWriter::new(file))
    }

    /// 버퍼를 파일에 플러시
    async fn flush_buffer(
        writer: &mut BufWriter<tokio::fs::File>,
        buffer: &mut Vec<u8>,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        writer.write_all(buffer).await.context("로그 데이터 작성 실패")?;
        writer.flush().await.context("로그 파일 플러시 실패")?;

        buffer.clear();
        Ok(())
    }
}

impl Drop for AsyncFileWriter {
    fn drop(&mut self) {
        // Drop에서는 async를 사용할 수 없으므로 종료 신호만 전송
        let _ = self.sender.send(WriteCommand::Shutdown);
    }
}

/// 날짜별 분류 파일 작성기 캐시 항목
struct DailyWriter {
    /// 작성기가 바라보는 날짜 (UTC, "%Y-%m-%d")
    date: String,
    /// 분류별 파일 작성기
    writer: Arc<AsyncFileWriter>,
}

/// 파일 싱크
///
/// 모든 이벤트를 메인 로그 파일에 기록하고, 동시에 로거 이름의 첫 세그먼트로
/// 분류된 `daily/<날짜>/<분류>.log` 파일에도 기록합니다. 분류별 작성기는
/// 날짜가 바뀔 때까지 캐시됩니다.
pub struct FileSink {
    /// 날짜별 디렉토리 (base_dir/daily)
    daily_dir: PathBuf,
    /// 파일용 포매터
    formatter: Arc<EventFormatter>,
    /// 콘솔 에코용 포매터 (색상 출력)
    console_formatter: EventFormatter,
    /// 메인 로그 파일 작성기
    main_writer: Arc<AsyncFileWriter>,
    /// 분류별 작성기 캐시
    daily_writers: DashMap<String, DailyWriter>,
    /// 작성기 플러시 간격
    flush_interval: Duration,
    /// 콘솔 에코 여부
    console_echo: bool,
}

impl FileSink {
    /// 설정에서 파일 싱크 생성
    pub async fn new(config: &PipelineConfig) -> Result<Self> {
        let base_dir = config.base_dir.clone();
        let daily_dir = base_dir.join("daily");

        tokio::fs::create_dir_all(&daily_dir)
            .await
            .context("날짜별 로그 디렉토리 생성 실패")?;

        let main_path = base_dir.join(&config.sink_file);
        let main_writer =
            Arc::new(AsyncFileWriter::new(main_path, config.flush_interval).await?);

        Ok(Self {
            daily_dir,
            formatter: Arc::new(EventFormatter::new(config.json_format, false)),
            console_formatter: EventFormatter::new(false, true),
            main_writer,
            daily_writers: DashMap::new(),
            flush_interval: config.flush_interval,
            console_echo: config.console_echo,
        })
    }

    /// 분류 이름을 파일 이름에 안전한 형태로 정리
    fn sanitize_category(category: &str) -> String {
        let cleaned: String = category
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if cleaned.is_empty() {
            "app".to_string()
        } else {
            cleaned
        }
    }

    /// 분류별 날짜 파일 작성기 반환 (캐시 또는 생성)
    async fn daily_writer_for(&self, category: &str, date: &str) -> Result<Arc<AsyncFileWriter>> {
        if let Some(cached) = self.daily_writers.get(category) {
            if cached.date == date {
                return Ok(cached.writer.clone());
            }
        }

        // 날짜가 바뀌었거나 처음 본 분류: 새 작성기 생성 후 교체
        let file_name = format!("{}.log", Self::sanitize_category(category));
        let path = self.daily_dir.join(date).join(file_name);
        let writer = Arc::new(AsyncFileWriter::new(path, self.flush_interval).await?);

        self.daily_writers.insert(
            category.to_string(),
            DailyWriter {
                date: date.to_string(),
                writer: writer.clone(),
            },
        );

        debug!(category = category, date = date, "분류별 로그 작성기 생성됨");
        Ok(writer)
    }
}

#[async_trait]
impl BackendSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn dispatch(&self, entry: &QueueEntry) -> Result<()> {
        let line = self.formatter.format(&entry.event)?;

        // 메인 로그 파일
        self.main_writer.write_line(line.clone())?;

        // 날짜/분류별 파일
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let writer = self.daily_writer_for(entry.event.category(), &date).await?;
        writer.write_line(line)?;

        // 콘솔 에코
        if self.console_echo {
            match self.console_formatter.format(&entry.event) {
                Ok(colored) => println!("{}", colored),
                Err(e) => warn!(error = %e, "콘솔 에코 형식화 실패"),
            }
        }

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.main_writer.flush().await?;

        // 맵 가드를 잡은 채 대기하지 않도록 작성기만 복사해서 플러시
        let writers: Vec<Arc<AsyncFileWriter>> = self
            .daily_writers
            .iter()
            .map(|cached| cached.writer.clone())
            .collect();
        for writer in writers {
            writer.flush().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.main_writer.shutdown().await?;

        let categories: Vec<String> = self
            .daily_writers
            .iter()
            .map(|cached| cached.key().clone())
            .collect();
        for category in categories {
            if let Some((_, cached)) = self.daily_writers.remove(&category) {
                cached.writer.shutdown().await?;
            }
        }

        debug!("파일 싱크 종료됨");
        Ok(())
    }
}

/// 메모리 싱크 (테스트용)
pub struct MemorySink {
    /// 전달된 이벤트들
    events: tokio::sync::Mutex<Vec<LogEvent>>,
    /// 형식화된 라인들
    lines: tokio::sync::Mutex<Vec<String>>,
    /// 포매터
    formatter: EventFormatter,
}

impl MemorySink {
    /// 새 메모리 싱크 생성
    pub fn new() -> Self {
        Self {
            events: tokio::sync::Mutex::new(Vec::new()),
            lines: tokio::sync::Mutex::new(Vec::new()),
            formatter: EventFormatter::new(false, false),
        }
    }

    /// 전달된 모든 이벤트 반환
    pub async fn events(&self) -> Vec<LogEvent> {
        self.events.lock().await.clone()
    }

    /// 형식화된 모든 라인 반환
    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }

    /// 전달된 이벤트 개수
    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    /// 싱크가 비어있는지 확인
    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    /// 저장된 이벤트 비우기
    pub async fn clear(&self) {
        self.events.lock().await.clear();
        self.lines.lock().await.clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn dispatch(&self, entry: &QueueEntry) -> Result<()> {
        let line = self.formatter.format(&entry.event)?;
        self.events.lock().await.push(entry.event.clone());
        self.lines.lock().await.push(line);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
