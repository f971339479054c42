//! 직접 폴백 작성기
//!
//! 비동기 파이프라인이 아직 준비되지 않았거나 실패했을 때에도 동작하는
//! 동기식 최후 경로입니다. 호출 스레드에서 즉시 파일에 기록하며,
//! 기록 실패는 표준 에러로만 알리고 호출자에게 전파하지 않습니다.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::event::{EventFormatter, LogEvent};

/// 폴백 로그 파일 이름 (기본 로그 디렉토리 바로 아래)
pub const DIRECT_LOG_FILE: &str = "direct_log.txt";

/// 직접 폴백 작성기
pub struct DirectLogWriter {
    /// 폴백 로그 파일 경로
    path: PathBuf,
    /// 포매터 (백엔드 싱크와 동일한 라인 형식)
    formatter: EventFormatter,
    /// 캐시된 파일 핸들 (실패 시 재오픈)
    file: Mutex<Option<File>>,
}

impl DirectLogWriter {
    /// 새 폴백 작성기 생성
    ///
    /// 파일은 첫 기록 시점에 지연 생성됩니다.
    pub fn new(path: impl Into<PathBuf>, formatter: EventFormatter) -> Self {
        Self {
            path: path.into(),
            formatter,
            file: Mutex::new(None),
        }
    }

    /// 폴백 파일 경로 반환
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 이벤트를 동기적으로 기록
    ///
    /// 성공 여부를 반환하며, 실패해도 호출자에게 에러를 전파하지 않습니다.
    pub fn write_event(&self, event: &LogEvent) -> bool {
        let line = match self.formatter.format(event) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("폴백 로그 형식화 실패: {}", e);
                return false;
            }
        };
        self.write_line(&line)
    }

    /// 형식화된 라인을 동기적으로 기록
    pub fn write_line(&self, line: &str) -> bool {
        let mut guard = self.file.lock();

        // 핸들이 깨졌으면 한 번 재오픈해서 재시도
        for _ in 0..2 {
            if guard.is_none() {
                match self.open_file() {
                    Ok(file) => *guard = Some(file),
                    Err(e) => {
                        eprintln!("폴백 로그 파일 열기 실패 ({}): {}", self.path.display(), e);
                        return false;
                    }
                }
            }

            if let Some(file) = guard.as_mut() {
                match writeln!(file, "{}", line) {
                    Ok(()) => return true,
                    Err(e) => {
                        eprintln!("폴백 로그 작성 실패 ({}): {}", self.path.display(), e);
                        *guard = None;
                    }
                }
            }
        }

        false
    }

    fn open_file(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CapturedError, Severity};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_writer(dir: &TempDir) -> DirectLogWriter {
        DirectLogWriter::new(
            dir.path().join("direct_log.txt"),
            EventFormatter::new(false, false),
        )
    }

    #[test]
    fn test_write_event_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let writer = test_writer(&temp_dir);

        let event = LogEvent::new(Severity::Error, "app.db", "connection lost", &[]);
        assert!(writer.write_event(&event));

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert!(content.contains("[ERROR]"));
        assert!(content.contains("connection lost"));
    }

    #[test]
    fn test_write_event_with_error_block() {
        let temp_dir = TempDir::new().unwrap();
        let writer = test_writer(&temp_dir);

        let error = CapturedError::new("IoError: broken pipe").with_stack_trace("writer::flush");
        let event =
            LogEvent::new(Severity::Fatal, "app.io", "flush failed", &[]).with_error(error);
        assert!(writer.write_event(&event));

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert!(content.contains("error: IoError: broken pipe"));
        assert!(content.contains("    at writer::flush"));
    }

    #[test]
    fn test_creates_missing_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let writer = DirectLogWriter::new(
            temp_dir.path().join("nested").join("direct_log.txt"),
            EventFormatter::new(false, false),
        );

        let event = LogEvent::new(Severity::Warn, "app", "first write", &[]);
        assert!(writer.write_event(&event));
        assert!(writer.path().exists());
    }

    #[test]
    fn test_concurrent_writes_keep_all_lines() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(test_writer(&temp_dir));

        let mut handles = Vec::new();
        for t in 0..4 {
            let writer = writer.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    let event = LogEvent::new(
                        Severity::Info,
                        "app.worker",
                        format!("thread {} line {}", t, i),
                        &[],
                    );
                    assert!(writer.write_event(&event));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(content.lines().count(), 100);
    }
}
