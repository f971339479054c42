//! 로그 라인 분류기
//!
//! 분석기와 모니터가 공유하는 좁은 라인 분류 인터페이스입니다.
//! 원시 로그 라인 하나를 받아 오류/경고/성능 기록 여부를 판정하고,
//! 집계 키로 쓸 시그니처를 추출합니다.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// 선행 타임스탬프 패턴 (텍스트 형식 로그 라인)
static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?)")
        .expect("Failed to compile timestamp regex")
});

/// 오류 심각도 태그 패턴
static ERROR_MARK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:ERROR|FATAL)\]|\b(?:ERROR|FATAL):").expect("Failed to compile error regex")
});

/// 경고 심각도 태그 패턴
static WARN_MARK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[WARN\]|\bWARNING\b|\bWARN:").expect("Failed to compile warn regex")
});

/// 예외 키워드 패턴 (예: TimeoutError, NullPointerException)
static EXCEPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z0-9_]*(?:Exception|Error))\b")
        .expect("Failed to compile exception regex")
});

/// 작업 지연 시간 패턴 (작업 이름 + 밀리초)
static PERF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.\-]*)\s+(?:took|completed in|finished in)\s+(\d+)\s*ms\b")
        .expect("Failed to compile perf regex")
});

/// 스택 연속 줄 패턴 ("at ...", "Caused by:", 백트레이스 프레임)
static CONTINUATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+(?:at\s|\d+:\s|\.{3})|^Caused by:|^\s+Caused by:")
        .expect("Failed to compile continuation regex")
});

/// 숫자 구간 패턴 (시그니처 정규화용)
static DIGITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("Failed to compile digits regex"));

/// 시그니처 최대 길이
const SIGNATURE_MAX_LEN: usize = 50;

/// 라인 분류 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// 분류 대상 아님
    None,
    /// 오류 라인 (집계 시그니처)
    Error(String),
    /// 경고 라인 (집계 시그니처)
    Warning(String),
    /// 성능 기록 라인 (작업 이름, 밀리초)
    Perf { operation: String, millis: u64 },
}

/// 라인 하나를 분류
///
/// 오류 판정이 경고 판정보다 우선합니다. 둘 다 매칭되는 라인은 오류로
/// 분류되어 한 번만 집계됩니다.
pub fn classify(line: &str) -> LineClass {
    if ERROR_MARK_RE.is_match(line) || EXCEPTION_RE.is_match(line) {
        return LineClass::Error(extract_signature(line, &ERROR_MARK_RE));
    }

    if WARN_MARK_RE.is_match(line) {
        return LineClass::Warning(extract_signature(line, &WARN_MARK_RE));
    }

    if let Some(caps) = PERF_RE.captures(line) {
        if let Ok(millis) = caps[2].parse::<u64>() {
            return LineClass::Perf {
                operation: caps[1].to_string(),
                millis,
            };
        }
    }

    LineClass::None
}

/// 라인이 치명적 오류(ERROR/FATAL 또는 예외 키워드)인지 판정
pub fn is_critical_line(line: &str) -> bool {
    ERROR_MARK_RE.is_match(line) || EXCEPTION_RE.is_match(line)
}

/// 라인이 스택 연속 줄인지 판정
pub fn is_continuation_line(line: &str) -> bool {
    CONTINUATION_RE.is_match(line)
}

/// 라인 선두의 타임스탬프 파싱
///
/// 타임스탬프가 없거나 형식이 다르면 None을 반환합니다.
pub fn parse_leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let caps = TIMESTAMP_RE.captures(line)?;
    let date = &caps[1];
    let time = caps[2].replace(',', ".");

    let naive = NaiveDateTime::parse_from_str(
        &format!("{} {}", date, time),
        "%Y-%m-%d %H:%M:%S%.f",
    )
    .ok()?;

    Some(naive.and_utc())
}

/// 집계 시그니처 추출
///
/// 예외 이름이 있으면 예외 이름이 시그니처가 되고, 없으면 심각도 마커 뒤의
/// 메시지를 정규화(숫자 접기, 공백 정리, 길이 제한)해서 사용합니다.
fn extract_signature(line: &str, marker: &Regex) -> String {
    if let Some(caps) = EXCEPTION_RE.captures(line) {
        return caps[1].to_string();
    }

    let rest = match marker.find(line) {
        Some(found) => &line[found.end()..],
        None => line,
    };

    normalize_signature(rest)
}

/// 시그니처 정규화
///
/// 숫자 구간을 접고 공백을 정리한 뒤, 첫 문장 경계와 최대 길이 중
/// 먼저 오는 지점에서 자릅니다.
fn normalize_signature(text: &str) -> String {
    let trimmed = text.trim_start_matches([' ', ':', ']', '-']).trim();
    let folded = DIGITS_RE.replace_all(trimmed, "N");
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    // 문장 경계: 공백이나 줄 끝이 뒤따르는 마침표
    let sentence_end = collapsed
        .char_indices()
        .find(|(idx, ch)| {
            *ch == '.'
                && collapsed[idx + 1..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(idx, _)| idx);

    let mut cut = sentence_end
        .unwrap_or(collapsed.len())
        .min(SIGNATURE_MAX_LEN);
    while cut < collapsed.len() && !collapsed.is_char_boundary(cut) {
        cut -= 1;
    }
    collapsed[..cut].trim_end().to_string()
}
