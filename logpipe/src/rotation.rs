//! 로그 파일 순환 및 보관 관리
//!
//! 날짜별 디렉토리의 gzip 아카이브 이동, 크기 초과 파일의 제자리 순환,
//! 보관 일수와 전체 크기 상한에 따른 아카이브 정리를 담당합니다.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::event::{LogEvent, Severity};
use crate::fallback::{DirectLogWriter, DIRECT_LOG_FILE};
use crate::metrics::PipelineMetrics;

/// 순환 작업 결과 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationSummary {
    /// 비워져 제거된 날짜 디렉토리 수
    pub directories_archived: usize,
    /// 압축된 파일 수
    pub files_compressed: usize,
    /// 압축이나 삭제에 실패해 남겨진 항목 수
    pub files_failed: usize,
    /// 날짜 형식이 아니라 건너뛴 항목 수
    pub entries_skipped: usize,
}

/// 로그 순환 관리자
pub struct RotationManager {
    /// 기본 로그 디렉토리
    base_dir: PathBuf,
    /// 날짜별 로그 디렉토리 (base_dir/daily)
    daily_dir: PathBuf,
    /// 아카이브 디렉토리 (base_dir/archive)
    archive_dir: PathBuf,
    /// 크기 검사 대상 활성 파일들
    active_files: Vec<PathBuf>,
    /// 크기 순환 임계값 (바이트)
    max_file_size: u64,
    /// 아카이브 보관 일수
    retention_days: u32,
    /// 아카이브 전체 크기 상한 (바이트)
    max_archive_bytes: u64,
    /// 실패 기록용 직접 폴백 작성기
    fallback: Option<Arc<DirectLogWriter>>,
}

/// 디렉토리 하나의 아카이브 처리 결과
#[derive(Default)]
struct DirOutcome {
    compressed: usize,
    failed: usize,
    removed: bool,
}

impl RotationManager {
    /// 설정에서 순환 관리자 생성
    pub fn new(config: &PipelineConfig) -> Self {
        let base_dir = config.base_dir.clone();
        let active_files = vec![
            base_dir.join(&config.sink_file),
            base_dir.join(DIRECT_LOG_FILE),
        ];

        Self {
            daily_dir: base_dir.join("daily"),
            archive_dir: base_dir.join("archive"),
            base_dir,
            active_files,
            max_file_size: config.max_file_size,
            retention_days: config.retention_days,
            max_archive_bytes: config.max_archive_bytes,
            fallback: None,
        }
    }

    /// 실패 기록용 폴백 작성기 연결
    pub fn with_fallback(mut self, fallback: Arc<DirectLogWriter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// 건너뛴 항목의 실패를 추적 로그와 직접 기록 파일 양쪽에 남김
    fn note_failure(&self, what: &str, path: &Path, error: &dyn std::fmt::Display) {
        warn!(path = %path.display(), error = %error, "{}", what);
        PipelineMetrics::record_rotation_failure();
        if let Some(fallback) = &self.fallback {
            fallback.write_event(&LogEvent::new(
                Severity::Error,
                "logpipe.rotation",
                format!("{}: {} ({})", what, path.display(), error),
                &[],
            ));
        }
    }

    /// 로그 디렉토리 초기화
    pub async fn initialize_directories(&self) -> Result<()> {
        for dir in [&self.base_dir, &self.daily_dir, &self.archive_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("로그 디렉토리 생성 실패: {}", dir.display()))?;
        }

        debug!("로그 디렉토리 초기화 완료");
        Ok(())
    }

    /// 날짜별 디렉토리 순환
    ///
    /// 이틀 이상 지난 daily/<날짜>/ 디렉토리의 파일들을 gzip으로 압축해
    /// 아카이브로 옮기고 디렉토리를 제거합니다. 옮길 디렉토리가 없으면
    /// 아무 작업도 하지 않으므로 반복 실행해도 안전합니다.
    pub async fn rotate_daily(&self) -> Result<RotationSummary> {
        let mut summary = RotationSummary::default();

        if !self.daily_dir.exists() {
            return Ok(summary);
        }

        let today = Utc::now().date_naive();
        let mut entries = fs::read_dir(&self.daily_dir)
            .await
            .context("날짜별 디렉토리 읽기 실패")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("디렉토리 항목 읽기 실패")?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            // 디렉토리 이름이 날짜 형식이 아니면 건너뜀
            let Some(dir_date) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").ok())
            else {
                summary.entries_skipped += 1;
                continue;
            };

            // 당일과 전날 디렉토리는 아직 기록 중일 수 있으므로 유지
            if (today - dir_date).num_days() < 2 {
                continue;
            }

            match self.archive_directory(&path, dir_date).await {
                Ok(outcome) => {
                    summary.files_compressed += outcome.compressed;
                    summary.files_failed += outcome.failed;
                    if outcome.removed {
                        summary.directories_archived += 1;
                    }
                }
                Err(e) => {
                    summary.files_failed += 1;
                    self.note_failure("날짜 디렉토리 아카이브 실패", &path, &e);
                }
            }
        }

        if summary.directories_archived > 0 {
            info!(
                directories = summary.directories_archived,
                files = summary.files_compressed,
                "날짜별 로그 순환 완료"
            );
        }

        Ok(summary)
    }

    /// 디렉토리 하나를 아카이브로 이동
    ///
    /// 파일 하나의 압축이나 삭제가 실패해도 나머지 파일은 계속 처리하고,
    /// 모든 파일이 옮겨져 비워진 경우에만 날짜 디렉토리를 제거합니다.
    async fn archive_directory(&self, dir: &Path, date: NaiveDate) -> Result<DirOutcome> {
        let mut outcome = DirOutcome::default();
        let mut entries = fs::read_dir(dir).await.context("날짜 디렉토리 읽기 실패")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("디렉토리 항목 읽기 실패")?
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown");
            let base = format!("{}-{}", name, date.format("%Y-%m-%d"));
            let target = self.unique_archive_path(&base);

            if let Err(e) = compress_file(path.clone(), target.clone()).await {
                outcome.failed += 1;
                self.note_failure("로그 파일 압축 실패, 건너뜀", &path, &e);
                continue;
            }
            PipelineMetrics::record_file_archived();
            outcome.compressed += 1;

            if let Err(e) = fs::remove_file(&path).await {
                outcome.failed += 1;
                self.note_failure("압축된 원본 삭제 실패", &path, &e);
                continue;
            }

            debug!(
                source = %path.display(),
                target = %target.display(),
                "로그 파일 압축됨"
            );
        }

        let mut remaining = fs::read_dir(dir).await.context("날짜 디렉토리 읽기 실패")?;
        if remaining
            .next_entry()
            .await
            .context("디렉토리 항목 읽기 실패")?
            .is_none()
        {
            match fs::remove_dir(dir).await {
                Ok(()) => outcome.removed = true,
                Err(e) => self.note_failure("빈 날짜 디렉토리 제거 실패", dir, &e),
            }
        } else {
            warn!(
                path = %dir.display(),
                "옮기지 못한 파일이 남아 날짜 디렉토리를 유지합니다"
            );
        }

        Ok(outcome)
    }

    /// 크기 초과 활성 파일 순환
    ///
    /// 활성 파일이 최대 크기를 넘으면 현재 내용을 gzip으로 아카이브한 뒤
    /// 파일을 제자리에서 비웁니다. 열려 있는 작성기 핸들은 그대로 이어서
    /// 기록합니다. 순환된 파일 경로들을 반환합니다.
    pub async fn check_active_file_size(&self) -> Result<Vec<PathBuf>> {
        let mut rotated = Vec::new();

        for path in &self.active_files {
            if !path.exists() {
                continue;
            }

            let size = match fs::metadata(path).await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    self.note_failure("활성 파일 메타데이터 읽기 실패", path, &e);
                    continue;
                }
            };
            if size <= self.max_file_size {
                continue;
            }

            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown");
            let base = format!("{}-{}", name, Utc::now().format("%Y-%m-%d"));
            let target = self.unique_archive_path(&base);

            if let Err(e) = compress_file(path.clone(), target.clone()).await {
                self.note_failure("활성 파일 압축 실패, 건너뜀", path, &e);
                continue;
            }
            PipelineMetrics::record_file_archived();
            if let Err(e) = truncate_in_place(path).await {
                // 다음 점검에서 다시 압축되므로 아카이브 사본만 중복될 수 있음
                self.note_failure("활성 파일 비우기 실패", path, &e);
                continue;
            }

            info!(
                path = %path.display(),
                size = size,
                archive = %target.display(),
                "크기 초과 파일 순환 완료"
            );
            rotated.push(path.clone());
        }

        Ok(rotated)
    }

    /// 보관 정책 적용
    ///
    /// 보관 일수를 넘긴 아카이브를 삭제하고, 남은 아카이브 전체 크기가
    /// 상한을 넘으면 가장 오래된 것부터 추가로 삭제합니다.
    /// 삭제된 파일 수를 반환합니다.
    pub async fn enforce_retention(&self) -> Result<usize> {
        if !self.archive_dir.exists() {
            return Ok(0);
        }

        let mut archives = self.collect_archives().await?;
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days as i64);
        let mut deleted = 0;

        // 1단계: 보관 일수 초과분 삭제
        let mut kept = Vec::new();
        for archive in archives.drain(..) {
            if archive.ordered_at < cutoff {
                match fs::remove_file(&archive.path).await {
                    Ok(()) => {
                        deleted += 1;
                        debug!(path = %archive.path.display(), "만료된 아카이브 삭제됨");
                    }
                    Err(e) => {
                        self.note_failure("아카이브 삭제 실패", &archive.path, &e);
                        kept.push(archive);
                    }
                }
            } else {
                kept.push(archive);
            }
        }

        // 2단계: 전체 크기 상한 초과분을 오래된 순서로 삭제
        let mut total: u64 = kept.iter().map(|a| a.size).sum();
        kept.sort_by_key(|a| a.ordered_at);

        for archive in kept {
            if total <= self.max_archive_bytes {
                break;
            }
            match fs::remove_file(&archive.path).await {
                Ok(()) => {
                    total = total.saturating_sub(archive.size);
                    deleted += 1;
                    debug!(
                        path = %archive.path.display(),
                        "크기 상한 초과로 아카이브 삭제됨"
                    );
                }
                Err(e) => {
                    self.note_failure("아카이브 삭제 실패", &archive.path, &e);
                }
            }
        }

        if deleted > 0 {
            PipelineMetrics::record_archives_deleted(deleted as u64);
            info!(deleted = deleted, "아카이브 보관 정책 적용 완료");
        }

        Ok(deleted)
    }

    /// 아카이브 디렉토리의 파일 목록 수집
    async fn collect_archives(&self) -> Result<Vec<ArchiveEntry>> {
        let mut archives = Vec::new();
        let mut entries = fs::read_dir(&self.archive_dir)
            .await
            .context("아카이브 디렉토리 읽기 실패")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("디렉토리 항목 읽기 실패")?
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let metadata = entry.metadata().await.context("파일 메타데이터 읽기 실패")?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            // 파일 이름에 박힌 날짜가 있으면 수정 시간보다 우선
            let ordered_at = embedded_date(&path)
                .map(|date| {
                    date.and_hms_opt(0, 0, 0)
                        .map(|naive| naive.and_utc())
                        .unwrap_or(modified)
                })
                .unwrap_or(modified);

            archives.push(ArchiveEntry {
                path,
                size: metadata.len(),
                ordered_at,
            });
        }

        Ok(archives)
    }

    /// 충돌하지 않는 아카이브 경로 생성
    ///
    /// `<base>.gz`가 이미 있으면 `<base>-1.gz`부터 차례로 시도합니다.
    fn unique_archive_path(&self, base: &str) -> PathBuf {
        let candidate = self.archive_dir.join(format!("{}.gz", base));
        if !candidate.exists() {
            return candidate;
        }

        let mut index = 1;
        loop {
            let candidate = self.archive_dir.join(format!("{}-{}.gz", base, index));
            if !candidate.exists() {
                return candidate;
            }
            index += 1;
        }
    }
}

/// 아카이브 파일 항목
struct ArchiveEntry {
    path: PathBuf,
    size: u64,
    /// 삭제 순서를 정하는 기준 시각 (파일명 날짜 우선, 없으면 수정 시간)
    ordered_at: DateTime<Utc>,
}

static FILE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("Failed to compile file date regex"));

/// 파일 이름에 박힌 날짜 추출 (예: "app.log-2026-08-23.gz")
fn embedded_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let found = FILE_DATE_RE.find(name)?;
    NaiveDate::parse_from_str(found.as_str(), "%Y-%m-%d").ok()
}

/// 파일을 gzip으로 압축
///
/// 압축은 블로킹 작업이므로 전용 블로킹 스레드에서 수행합니다.
async fn compress_file(source: PathBuf, target: PathBuf) -> Result<()> {
    let result = tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).context("아카이브 디렉토리 생성 실패")?;
        }

        let input = std::fs::File::open(&source)
            .with_context(|| format!("압축 원본 열기 실패: {}", source.display()))?;
        let output = std::fs::File::create(&target)
            .with_context(|| format!("아카이브 파일 생성 실패: {}", target.display()))?;

        let mut reader = std::io::BufReader::new(input);
        let mut encoder = GzEncoder::new(output, Compression::default());
        std::io::copy(&mut reader, &mut encoder).context("로그 파일 압축 실패")?;
        encoder.finish().context("gzip 스트림 마무리 실패")?;

        Ok(())
    })
    .await
    .context("압축 태스크 종료 대기 실패")?;

    result
}

/// 활성 파일을 제자리에서 비움 (열린 append 핸들은 유지됨)
async fn truncate_in_place(path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .context("활성 파일 열기 실패")?;
    file.set_len(0).await.context("활성 파일 비우기 실패")?;
    Ok(())
}
