//! 증분 로그 감시기
//!
//! 메인 로그, 당일 날짜 디렉토리, 직접 기록 파일을 훑어 치명적 오류
//! (ERROR/FATAL) 블록을 수집합니다. 타임스탬프 커서를 유지해 한 번
//! 보고한 라인은 다시 보고하지 않습니다.
//!
//! - 커서는 [이전 검사 시각, 이번 검사 시작 시각) 반개구간을 만들어
//!   검사 간 중복과 누락을 모두 막습니다
//! - 치명적 라인 다음의 스택 연속 줄은 같은 블록으로 묶입니다

use anyhow::{Context, Result};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::classify::{is_continuation_line, is_critical_line, parse_leading_timestamp};
use crate::config::PipelineConfig;
use crate::fallback::DIRECT_LOG_FILE;

/// 치명적 오류 블록
///
/// 첫 줄은 치명적 오류 라인이고 나머지는 스택 연속 줄입니다.
#[derive(Debug, Clone)]
pub struct CriticalBlock {
    /// 오류 라인의 타임스탬프
    pub timestamp: DateTime<Utc>,
    /// 오류 라인과 이어지는 연속 줄
    pub lines: Vec<String>,
    /// 발견된 파일 이름
    pub source: String,
}

impl CriticalBlock {
    /// 블록의 첫 줄 (치명적 오류 라인)
    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    /// 블록 전체를 한 덩어리 텍스트로
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// 로그 라인 타임스탬프와 같은 밀리초 정밀도로 절사
///
/// 커서가 라인보다 정밀하면 커서와 같은 밀리초에 기록된 라인이
/// 구간 밖으로 밀려나므로, 커서는 항상 이 정밀도로 유지합니다.
fn floor_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(time)
}

/// 증분 로그 감시기
pub struct LogMonitor {
    /// 감시 대상 파일 (메인 싱크 + 직접 기록 파일)
    files: Vec<PathBuf>,
    /// 날짜별 로그 디렉토리 (당일 분류 파일도 검사 대상)
    daily_dir: PathBuf,
    /// 마지막 검사 시각 커서
    cursor: RwLock<DateTime<Utc>>,
}

impl LogMonitor {
    /// 설정에서 감시기 생성
    ///
    /// 커서는 생성 시각으로 초기화되므로 그 이전에 기록된 오류는 보고하지 않습니다.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            files: vec![
                config.base_dir.join(&config.sink_file),
                config.base_dir.join(DIRECT_LOG_FILE),
            ],
            daily_dir: config.base_dir.join("daily"),
            cursor: RwLock::new(floor_to_millis(Utc::now())),
        }
    }

    /// 현재 커서 시각
    pub fn cursor(&self) -> DateTime<Utc> {
        *self.cursor.read()
    }

    /// 커서 이후에 기록된 치명적 오류 블록 수집
    ///
    /// 검사 시작 시각까지의 반개구간을 훑고 커서를 전진시킵니다.
    /// 같은 블록이 두 번 반환되는 일은 없으며, 파일 하나의 검사 실패는
    /// 기록하고 건너뛰므로 커서는 결과와 무관하게 항상 전진합니다.
    pub async fn check_for_critical_errors(&self) -> Result<Vec<CriticalBlock>> {
        let since = *self.cursor.read();
        // 이번 밀리초에 기록 중인 라인은 다음 검사 구간으로 넘김
        let until = floor_to_millis(Utc::now());

        let mut targets = self.files.clone();
        targets.extend(self.today_daily_files().await);

        let mut blocks = Vec::new();
        for path in &targets {
            if !path.is_file() {
                continue;
            }
            match self.scan_file(path, since, until).await {
                Ok(found) => blocks.extend(found),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "감시 대상 파일 검사 실패"
                ),
            }
        }

        *self.cursor.write() = until;

        blocks.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.lines.first().cmp(&b.lines.first()))
        });
        // ERROR 이상 이벤트는 메인 파일과 직접 기록 파일 양쪽에 남으므로
        // 타임스탬프와 첫 줄이 같은 블록은 한 번만 보고
        blocks.dedup_by(|a, b| a.timestamp == b.timestamp && a.lines.first() == b.lines.first());

        if !blocks.is_empty() {
            debug!(count = blocks.len(), "치명적 오류 블록 발견");
        }

        Ok(blocks)
    }

    /// 당일 날짜 디렉토리의 분류별 로그 파일 목록
    async fn today_daily_files(&self) -> Vec<PathBuf> {
        let today_dir = self
            .daily_dir
            .join(Utc::now().format("%Y-%m-%d").to_string());
        let Ok(mut entries) = fs::read_dir(&today_dir).await else {
            return Vec::new();
        };

        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "log") {
                files.push(path);
            }
        }
        files
    }

    /// 파일 하나를 훑어 [since, until) 구간의 치명적 블록 수집
    async fn scan_file(
        &self,
        path: &PathBuf,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CriticalBlock>> {
        let source = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
            .to_string();

        let file = fs::File::open(path)
            .await
            .with_context(|| format!("감시 대상 파일 열기 실패: {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let mut blocks = Vec::new();
        let mut current: Option<CriticalBlock> = None;

        while let Some(line) = lines.next_line().await.context("로그 라인 읽기 실패")? {
            // 열린 블록이 있으면 연속 줄을 흡수
            if let Some(open) = current.as_mut() {
                if is_continuation_line(&line) {
                    open.lines.push(line);
                    continue;
                }
            }
            if let Some(done) = current.take() {
                blocks.push(done);
            }

            if !is_critical_line(&line) {
                continue;
            }
            // 타임스탬프 없는 라인은 구간 판정이 불가능하므로 건너뜀
            let Some(timestamp) = parse_leading_timestamp(&line) else {
                continue;
            };
            if timestamp < since || timestamp >= until {
                continue;
            }

            current = Some(CriticalBlock {
                timestamp,
                lines: vec![line],
                source: source.clone(),
            });
        }

        if let Some(done) = current.take() {
            blocks.push(done);
        }

        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn stamp(time: DateTime<Utc>) -> String {
        time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    fn config_for(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    async fn append(dir: &TempDir, file: &str, lines: &[String]) {
        let path = dir.path().join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.unwrap();
        }
        let mut content = lines.join("\n");
        content.push('\n');

        let existing = fs::read_to_string(&path).await.unwrap_or_default();
        fs::write(&path, format!("{}{}", existing, content))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_detects_critical_error_after_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let now = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            "app.log",
            &[
                format!("{} [INFO] [app] 정상 동작", stamp(now)),
                format!("{} [ERROR] [app.db] connection refused", stamp(now)),
            ],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let blocks = monitor.check_for_critical_errors().await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].first_line().contains("connection refused"));
        assert_eq!(blocks[0].source, "app.log");
    }

    #[tokio::test]
    async fn test_ignores_lines_before_cursor() {
        let temp_dir = TempDir::new().unwrap();

        let old = Utc::now() - Duration::hours(1);
        append(
            &temp_dir,
            "app.log",
            &[format!("{} [ERROR] [app] 오래된 오류", stamp(old))],
        )
        .await;

        // 생성 이전 기록은 커서 밖
        let monitor = LogMonitor::new(&config_for(&temp_dir));
        let blocks = monitor.check_for_critical_errors().await.unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn test_no_duplicate_reports_across_checks() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let first = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            "app.log",
            &[format!("{} [FATAL] [app] 첫 번째 오류", stamp(first))],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let first_pass = monitor.check_for_critical_errors().await.unwrap();
        assert_eq!(first_pass.len(), 1);

        // 새 기록 없이 다시 검사하면 빈 결과
        let second_pass = monitor.check_for_critical_errors().await.unwrap();
        assert!(second_pass.is_empty());

        // 새 오류는 다음 검사에서만 잡힘
        let second = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            "app.log",
            &[format!("{} [ERROR] [app] 두 번째 오류", stamp(second))],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let third_pass = monitor.check_for_critical_errors().await.unwrap();
        assert_eq!(third_pass.len(), 1);
        assert!(third_pass[0].first_line().contains("두 번째"));
    }

    #[tokio::test]
    async fn test_line_in_same_millisecond_as_cursor_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        // 커서와 같은 밀리초에 기록된 치명적 라인
        append(
            &temp_dir,
            "app.log",
            &[format!(
                "{} [FATAL] [app] 기동 직후 오류",
                stamp(monitor.cursor())
            )],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let first_pass = monitor.check_for_critical_errors().await.unwrap();
        assert_eq!(first_pass.len(), 1);
        assert!(first_pass[0].first_line().contains("기동 직후 오류"));

        // 재검사에서 같은 블록이 다시 보고되지 않음
        let second_pass = monitor.check_for_critical_errors().await.unwrap();
        assert!(second_pass.is_empty());
    }

    #[tokio::test]
    async fn test_collects_continuation_lines_into_block() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let now = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            "app.log",
            &[
                format!("{} [ERROR] [app.net] TimeoutError 발생", stamp(now)),
                "    at service::poll".to_string(),
                "Caused by: socket closed".to_string(),
                format!("{} [INFO] [app] 후속 정상 라인", stamp(now)),
            ],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let blocks = monitor.check_for_critical_errors().await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines.len(), 3);
        assert!(blocks[0].render().contains("Caused by: socket closed"));
    }

    #[tokio::test]
    async fn test_warn_lines_are_not_critical() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let now = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            "app.log",
            &[format!("{} [WARN] [app.cache] 적중률 낮음", stamp(now))],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let blocks = monitor.check_for_critical_errors().await.unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn test_same_event_in_both_files_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let now = Utc::now() + Duration::milliseconds(1);
        let line = format!("{} [ERROR] [app.db] connection refused", stamp(now));
        append(&temp_dir, "app.log", &[line.clone()]).await;
        append(&temp_dir, DIRECT_LOG_FILE, &[line]).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let blocks = monitor.check_for_critical_errors().await.unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_scans_today_daily_directory() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let now = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            &format!("daily/{}/db.log", today),
            &[format!("{} [ERROR] [app.db] deadlock detected", stamp(now))],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let blocks = monitor.check_for_critical_errors().await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source, "db.log");
    }

    #[tokio::test]
    async fn test_scans_direct_log_file_too() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = LogMonitor::new(&config_for(&temp_dir));

        let now = Utc::now() + Duration::milliseconds(1);
        append(
            &temp_dir,
            DIRECT_LOG_FILE,
            &[format!("{} [FATAL] [app] 폴백 경로 오류", stamp(now))],
        )
        .await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let blocks = monitor.check_for_critical_errors().await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source, DIRECT_LOG_FILE);
    }
}
