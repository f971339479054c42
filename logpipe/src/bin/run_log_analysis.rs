//! 로그 분석 실행 도구
//!
//! 지정한 날짜(기본: 어제)의 로그를 분석해 리포트 파일을 생성합니다.
//!
//! 사용법:
//!   run_log_analysis [YYYY-MM-DD]

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::info;

use logpipe::{LogAnalyzer, PipelineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // 환경 설정 로드
    let config = PipelineConfig::from_env();
    config.validate()?;

    // 분석 대상 날짜: 인자가 없으면 어제
    let date = match std::env::args().nth(1) {
        Some(arg) => NaiveDate::parse_from_str(&arg, "%Y-%m-%d")
            .with_context(|| format!("날짜 형식이 잘못되었습니다 (YYYY-MM-DD): {}", arg))?,
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .context("어제 날짜 계산 실패")?,
    };

    info!("=== 로그 분석 실행 ===");
    info!("로그 디렉토리: {}", config.base_dir.display());
    info!("분석 날짜: {}", date.format("%Y-%m-%d"));
    info!("======================");

    let analyzer = LogAnalyzer::new(&config);
    let (report, path) = analyzer.generate_report(date).await?;

    println!("{}", report.render_text());
    println!("리포트 저장 위치: {}", path.display());

    Ok(())
}
