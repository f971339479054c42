//! 로그 분석기
//!
//! 하루치 로그 파일을 스캔해 오류/경고 빈도, 작업 지연 통계, 예외 시그니처를
//! 집계하고 사람이 읽을 수 있는 리포트 파일을 생성합니다.
//!
//! 스캔 대상은 daily/<날짜>/ 아래의 분류별 파일이며, 이미 아카이브로 옮겨진
//! 날짜는 archive/의 gzip 파일을 풀어 읽습니다.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::classify::{classify, is_continuation_line, LineClass};
use crate::config::PipelineConfig;
use crate::event::{LogEvent, Severity};
use crate::fallback::DirectLogWriter;
use crate::metrics::PipelineMetrics;

/// 작업 지연 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationStats {
    /// 기록 횟수
    pub count: u64,
    /// 지연 시간 합계 (밀리초)
    pub total_millis: u64,
    /// 최소 지연 (밀리초)
    pub min_millis: u64,
    /// 최대 지연 (밀리초)
    pub max_millis: u64,
}

impl OperationStats {
    /// 지연 시간 샘플 기록
    pub fn record(&mut self, millis: u64) {
        if self.count == 0 {
            self.min_millis = millis;
            self.max_millis = millis;
        } else {
            self.min_millis = self.min_millis.min(millis);
            self.max_millis = self.max_millis.max(millis);
        }
        self.count += 1;
        self.total_millis += millis;
    }

    /// 평균 지연 (밀리초)
    pub fn average_millis(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_millis / self.count
        }
    }
}

/// 하루치 분석 결과 리포트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// 분석 대상 날짜
    pub date: NaiveDate,
    /// 리포트 생성 시각
    pub generated_at: DateTime<Utc>,
    /// 검사한 파일 수
    pub files_scanned: usize,
    /// 검사한 라인 수
    pub lines_scanned: u64,
    /// 오류 총 건수
    pub total_errors: u64,
    /// 경고 총 건수
    pub total_warnings: u64,
    /// 시그니처별 오류 빈도
    pub error_counts: HashMap<String, u64>,
    /// 시그니처별 경고 빈도
    pub warning_counts: HashMap<String, u64>,
    /// 작업별 지연 통계
    pub operation_stats: HashMap<String, OperationStats>,
    /// 발견된 예외 시그니처 (정렬됨)
    pub exception_signatures: Vec<String>,
    /// 권장 사항
    pub recommendations: Vec<String>,
}

impl AnalysisReport {
    /// 빈도 내림차순 상위 오류 목록
    pub fn top_errors(&self, limit: usize) -> Vec<(String, u64)> {
        top_of(&self.error_counts, limit)
    }

    /// 빈도 내림차순 상위 경고 목록
    pub fn top_warnings(&self, limit: usize) -> Vec<(String, u64)> {
        top_of(&self.warning_counts, limit)
    }

    /// 평균 지연 내림차순 상위 작업 목록
    pub fn slowest_operations(&self, limit: usize) -> Vec<(String, OperationStats)> {
        let mut items: Vec<(String, OperationStats)> = self
            .operation_stats
            .iter()
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect();
        items.sort_by(|a, b| {
            b.1.average_millis()
                .cmp(&a.1.average_millis())
                .then_with(|| a.0.cmp(&b.0))
        });
        items.truncate(limit);
        items
    }

    /// 핵심 수치 요약 (키-값 문자열)
    pub fn summary(&self) -> HashMap<String, String> {
        let mut summary = HashMap::new();
        summary.insert("date".to_string(), self.date.format("%Y-%m-%d").to_string());
        summary.insert("files_scanned".to_string(), self.files_scanned.to_string());
        summary.insert("lines_scanned".to_string(), self.lines_scanned.to_string());
        summary.insert("total_errors".to_string(), self.total_errors.to_string());
        summary.insert("total_warnings".to_string(), self.total_warnings.to_string());
        summary.insert(
            "distinct_errors".to_string(),
            self.error_counts.len().to_string(),
        );
        summary.insert(
            "distinct_warnings".to_string(),
            self.warning_counts.len().to_string(),
        );
        summary.insert(
            "exception_count".to_string(),
            self.exception_signatures.len().to_string(),
        );

        if let Some((signature, count)) = self.top_errors(1).into_iter().next() {
            summary.insert("top_error".to_string(), signature);
            summary.insert("top_error_count".to_string(), count.to_string());
        }

        if let Some((operation, stats)) = self.slowest_operations(1).into_iter().next() {
            summary.insert("slowest_operation".to_string(), operation);
            summary.insert(
                "slowest_avg_ms".to_string(),
                stats.average_millis().to_string(),
            );
        }

        summary
    }

    /// 사람이 읽을 수 있는 텍스트 리포트 생성
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        out.push_str("========================================\n");
        out.push_str(&format!(
            " 로그 분석 리포트 - {}\n",
            self.date.format("%Y-%m-%d")
        ));
        out.push_str(&format!(
            " 생성 시각: {} UTC\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str("========================================\n\n");

        out.push_str("[요약]\n");
        out.push_str(&format!("- 검사한 파일: {}개\n", self.files_scanned));
        out.push_str(&format!("- 검사한 라인: {}줄\n", self.lines_scanned));
        out.push_str(&format!(
            "- 오류: {}건 (고유 시그니처 {}종)\n",
            self.total_errors,
            self.error_counts.len()
        ));
        out.push_str(&format!(
            "- 경고: {}건 (고유 시그니처 {}종)\n",
            self.total_warnings,
            self.warning_counts.len()
        ));
        out.push_str(&format!(
            "- 성능 기록 작업: {}종\n",
            self.operation_stats.len()
        ));
        out.push_str(&format!(
            "- 예외 시그니처: {}종\n\n",
            self.exception_signatures.len()
        ));

        out.push_str("[오류 빈도 TOP 10]\n");
        let top_errors = self.top_errors(10);
        if top_errors.is_empty() {
            out.push_str("  (기록된 오류 없음)\n");
        }
        for (signature, count) in top_errors {
            out.push_str(&format!("  {:>5}회  {}\n", count, signature));
        }
        out.push('\n');

        out.push_str("[경고 빈도 TOP 10]\n");
        let top_warnings = self.top_warnings(10);
        if top_warnings.is_empty() {
            out.push_str("  (기록된 경고 없음)\n");
        }
        for (signature, count) in top_warnings {
            out.push_str(&format!("  {:>5}회  {}\n", count, signature));
        }
        out.push('\n');

        out.push_str("[느린 작업 TOP 10]\n");
        let slowest = self.slowest_operations(10);
        if slowest.is_empty() {
            out.push_str("  (성능 기록 없음)\n");
        }
        for (operation, stats) in slowest {
            out.push_str(&format!(
                "  {}  평균 {}ms (min {} / max {}, {}회)\n",
                operation,
                stats.average_millis(),
                stats.min_millis,
                stats.max_millis,
                stats.count
            ));
        }
        out.push('\n');

        out.push_str("[예외 시그니처]\n");
        if self.exception_signatures.is_empty() {
            out.push_str("  (발견된 예외 없음)\n");
        }
        for signature in &self.exception_signatures {
            out.push_str(&format!("  - {}\n", signature));
        }
        out.push('\n');

        out.push_str("[권장 사항]\n");
        if self.recommendations.is_empty() {
            out.push_str("  - 특이 사항 없음\n");
        }
        for recommendation in &self.recommendations {
            out.push_str(&format!("  - {}\n", recommendation));
        }

        out
    }
}

/// 빈도 내림차순, 같은 빈도는 시그니처 사전순
fn top_of(counts: &HashMap<String, u64>, limit: usize) -> Vec<(String, u64)> {
    let mut items: Vec<(String, u64)> = counts
        .iter()
        .map(|(signature, count)| (signature.clone(), *count))
        .collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items.truncate(limit);
    items
}

/// 라인 집계 누적기
#[derive(Default)]
struct Aggregates {
    lines: u64,
    errors: HashMap<String, u64>,
    warnings: HashMap<String, u64>,
    operations: HashMap<String, OperationStats>,
    exceptions: BTreeSet<String>,
}

impl Aggregates {
    fn consume(&mut self, line: &str) {
        self.lines += 1;

        // 스택 연속 줄은 블록 선두에서 이미 집계됨
        if is_continuation_line(line) {
            return;
        }

        match classify(line) {
            LineClass::Error(signature) => {
                if signature.ends_with("Exception") || signature.ends_with("Error") {
                    self.exceptions.insert(signature.clone());
                }
                *self.errors.entry(signature).or_insert(0) += 1;
            }
            LineClass::Warning(signature) => {
                *self.warnings.entry(signature).or_insert(0) += 1;
            }
            LineClass::Perf { operation, millis } => {
                self.operations.entry(operation).or_default().record(millis);
            }
            LineClass::None => {}
        }
    }
}

/// 로그 분석기
pub struct LogAnalyzer {
    /// 날짜별 로그 디렉토리
    daily_dir: PathBuf,
    /// 아카이브 디렉토리
    archive_dir: PathBuf,
    /// 리포트 출력 디렉토리
    analysis_dir: PathBuf,
    /// 실패 기록용 직접 폴백 작성기
    fallback: Option<Arc<DirectLogWriter>>,
}

impl LogAnalyzer {
    /// 설정에서 분석기 생성
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            daily_dir: config.base_dir.join("daily"),
            archive_dir: config.base_dir.join("archive"),
            analysis_dir: config.base_dir.join("analysis"),
            fallback: None,
        }
    }

    /// 실패 기록용 폴백 작성기 연결
    pub fn with_fallback(mut self, fallback: Arc<DirectLogWriter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// 건너뛴 파일의 실패를 추적 로그와 직접 기록 파일 양쪽에 남김
    fn note_failure(&self, what: &str, path: &Path, error: &dyn std::fmt::Display) {
        warn!(path = %path.display(), error = %error, "{}", what);
        if let Some(fallback) = &self.fallback {
            fallback.write_event(&LogEvent::new(
                Severity::Error,
                "logpipe.analyzer",
                format!("{}: {} ({})", what, path.display(), error),
                &[],
            ));
        }
    }

    /// 지정한 날짜의 로그를 스캔해 집계
    ///
    /// 해당 날짜의 로그가 전혀 없으면 0으로 채워진 리포트를 반환합니다.
    pub async fn analyze(&self, date: NaiveDate) -> Result<AnalysisReport> {
        let mut aggregates = Aggregates::default();
        let mut files_scanned = 0;

        let date_dir = self.daily_dir.join(date.format("%Y-%m-%d").to_string());
        if date_dir.is_dir() {
            files_scanned += self.scan_directory(&date_dir, &mut aggregates).await?;
        } else {
            files_scanned += self.scan_archives(date, &mut aggregates).await?;
        }

        debug!(
            date = %date.format("%Y-%m-%d"),
            files = files_scanned,
            lines = aggregates.lines,
            "로그 스캔 완료"
        );

        Ok(self.build_report(date, files_scanned, aggregates))
    }

    /// 분석을 수행하고 리포트 파일을 기록
    ///
    /// 리포트와 기록된 파일 경로를 반환합니다.
    pub async fn generate_report(&self, date: NaiveDate) -> Result<(AnalysisReport, PathBuf)> {
        let report = self.analyze(date).await?;

        fs::create_dir_all(&self.analysis_dir)
            .await
            .context("분석 디렉토리 생성 실패")?;

        let path = self
            .analysis_dir
            .join(format!("analysis_{}.txt", date.format("%Y-%m-%d")));
        fs::write(&path, report.render_text())
            .await
            .context("리포트 파일 기록 실패")?;

        PipelineMetrics::record_analysis_run();
        info!(
            date = %date.format("%Y-%m-%d"),
            path = %path.display(),
            errors = report.total_errors,
            warnings = report.total_warnings,
            "로그 분석 리포트 생성 완료"
        );

        Ok((report, path))
    }

    /// 날짜 디렉토리의 평문 로그 파일 스캔
    ///
    /// 파일 하나를 열거나 읽는 데 실패하면 그 파일만 건너뜁니다.
    async fn scan_directory(&self, dir: &PathBuf, aggregates: &mut Aggregates) -> Result<usize> {
        let mut files_scanned = 0;
        let mut entries = fs::read_dir(dir).await.context("날짜 디렉토리 읽기 실패")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("디렉토리 항목 읽기 실패")?
        {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "log") {
                continue;
            }

            let file = match fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    self.note_failure("로그 파일 열기 실패, 건너뜀", &path, &e);
                    continue;
                }
            };
            let reader = BufReader::new(file);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => aggregates.consume(&line),
                    Ok(None) => break,
                    Err(e) => {
                        // 읽은 데까지는 집계에 반영하고 나머지는 포기
                        self.note_failure("로그 라인 읽기 실패", &path, &e);
                        break;
                    }
                }
            }
            files_scanned += 1;
        }

        Ok(files_scanned)
    }

    /// 아카이브로 옮겨진 날짜의 gzip 파일 스캔
    async fn scan_archives(&self, date: NaiveDate, aggregates: &mut Aggregates) -> Result<usize> {
        if !self.archive_dir.exists() {
            return Ok(0);
        }

        // 아카이브 이름은 <원본 이름>-<날짜>[-<번호>].gz 형식
        let date_tag = format!("-{}", date.format("%Y-%m-%d"));
        let mut files_scanned = 0;
        let mut entries = fs::read_dir(&self.archive_dir)
            .await
            .context("아카이브 디렉토리 읽기 실패")?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("디렉토리 항목 읽기 실패")?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".gz") || !name.contains(&date_tag) {
                continue;
            }

            match read_gzip_lines(path.clone()).await {
                Ok(lines) => {
                    for line in lines {
                        aggregates.consume(&line);
                    }
                    files_scanned += 1;
                }
                Err(e) => {
                    self.note_failure("아카이브 읽기 실패, 건너뜀", &path, &e);
                }
            }
        }

        Ok(files_scanned)
    }

    /// 집계 결과로 리포트 구성
    fn build_report(
        &self,
        date: NaiveDate,
        files_scanned: usize,
        aggregates: Aggregates,
    ) -> AnalysisReport {
        let total_errors = aggregates.errors.values().sum();
        let total_warnings = aggregates.warnings.values().sum();

        let mut report = AnalysisReport {
            date,
            generated_at: Utc::now(),
            files_scanned,
            lines_scanned: aggregates.lines,
            total_errors,
            total_warnings,
            error_counts: aggregates.errors,
            warning_counts: aggregates.warnings,
            operation_stats: aggregates.operations,
            exception_signatures: aggregates.exceptions.into_iter().collect(),
            recommendations: Vec::new(),
        };
        report.recommendations = build_recommendations(&report);
        report
    }
}

/// 빈번한 오류로 간주하는 최소 발생 횟수
const FREQUENT_ERROR_THRESHOLD: u64 = 10;
/// 느린 작업으로 간주하는 평균 지연 (밀리초, 초과 기준)
const SLOW_OPERATION_MILLIS: u64 = 1000;
/// 권장 사항에 예시로 포함할 예외 시그니처 수
const EXCEPTION_SAMPLE_LIMIT: usize = 5;

/// 집계 수치에서 권장 사항 도출
fn build_recommendations(report: &AnalysisReport) -> Vec<String> {
    let mut recommendations = Vec::new();

    // 빈도 내림차순 정렬이므로 임계값 아래로 내려가면 이후 항목도 전부 미달
    for (signature, count) in report
        .top_errors(report.error_counts.len())
        .into_iter()
        .take_while(|(_, count)| *count >= FREQUENT_ERROR_THRESHOLD)
    {
        recommendations.push(format!(
            "오류 '{}'가 {}회 발생했습니다. 원인 조사가 필요합니다.",
            signature, count
        ));
    }

    for (operation, stats) in report
        .slowest_operations(report.operation_stats.len())
        .into_iter()
        .take_while(|(_, stats)| stats.average_millis() > SLOW_OPERATION_MILLIS)
    {
        recommendations.push(format!(
            "작업 '{}'의 평균 지연이 {}ms입니다. 성능 점검이 필요합니다.",
            operation,
            stats.average_millis()
        ));
    }

    if !report.exception_signatures.is_empty() {
        let sample = report
            .exception_signatures
            .iter()
            .take(EXCEPTION_SAMPLE_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        recommendations.push(format!(
            "발견된 예외 {}종 중 우선 점검 대상: {}",
            report.exception_signatures.len(),
            sample
        ));
    }

    recommendations
}

/// gzip 파일의 라인들을 블로킹 스레드에서 읽기
async fn read_gzip_lines(path: PathBuf) -> Result<Vec<String>> {
    let lines = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        use std::io::BufRead;

        let file = std::fs::File::open(&path)
            .with_context(|| format!("아카이브 열기 실패: {}", path.display()))?;
        let reader = std::io::BufReader::new(GzDecoder::new(file));

        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line.context("아카이브 라인 읽기 실패")?);
        }
        Ok(lines)
    })
    .await
    .context("아카이브 읽기 태스크 종료 대기 실패")?;

    lines
}
