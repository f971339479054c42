//! 파이프라인 에러 정의
//!
//! 로그 파이프라인의 모든 에러를 체계적으로 관리합니다.
//! 수집 경로는 에러를 호출자에게 전파하지 않으므로, 이 타입은
//! 관리 작업(순환, 분석, 알림)의 결과 보고에 사용됩니다.

use std::path::PathBuf;
use thiserror::Error;

/// 공통 파이프라인 에러 정의
#[derive(Error, Debug)]
pub enum PipelineError {
    // 파일 시스템 에러
    #[error("입출력 오류 ({path:?}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // 설정 에러
    #[error("설정 오류: {0}")]
    Config(String),

    // 로그 라인 해석 에러
    #[error("로그 라인 파싱 실패: {0}")]
    Parse(String),

    // 알림 전송 에러
    #[error("알림 전송 실패: {0}")]
    AlertTransport(String),

    // 수명주기 에러
    #[error("파이프라인 상태 오류: {0}")]
    Lifecycle(String),
}

impl PipelineError {
    /// 경로 정보를 포함한 입출력 에러 생성
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 설정 에러 생성
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
