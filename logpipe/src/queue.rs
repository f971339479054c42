//! 유계 비동기 이벤트 큐
//!
//! 수집 경로와 배치 처리기 사이의 lock-free 유계 큐입니다.
//! 큐가 가득 차면 이벤트를 블로킹 없이 드롭하고 카운터만 증가시킵니다.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::event::LogEvent;
use crate::metrics::PipelineMetrics;

/// 큐에 대기 중인 이벤트 항목
#[derive(Debug)]
pub struct QueueEntry {
    /// 로그 이벤트
    pub event: LogEvent,
    /// 큐 진입 시각 (대기 시간 측정용)
    pub enqueued_at: Instant,
    /// 전달 대상 싱크 이름
    pub sink: String,
}

impl QueueEntry {
    /// 새 큐 항목 생성
    pub fn new(event: LogEvent, sink: impl Into<String>) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
            sink: sink.into(),
        }
    }
}

/// 유계 이벤트 큐
pub struct EventQueue {
    /// lock-free 유계 큐
    inner: ArrayQueue<QueueEntry>,
    /// 수용된 이벤트 누적 수
    enqueued: AtomicU64,
    /// 큐 포화로 드롭된 이벤트 누적 수
    dropped_full: AtomicU64,
}

impl EventQueue {
    /// 지정한 용량의 큐 생성
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
            enqueued: AtomicU64::new(0),
            dropped_full: AtomicU64::new(0),
        }
    }

    /// 이벤트 항목 추가 (논블로킹)
    ///
    /// 큐가 가득 차면 항목을 버리고 false를 반환합니다.
    pub fn push(&self, entry: QueueEntry) -> bool {
        match self.inner.push(entry) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::AcqRel);
                PipelineMetrics::record_enqueued();
                PipelineMetrics::set_queue_depth(self.inner.len());
                true
            }
            Err(_) => {
                self.dropped_full.fetch_add(1, Ordering::AcqRel);
                PipelineMetrics::record_drop_queue_full();
                false
            }
        }
    }

    /// 이벤트 항목 꺼내기 (논블로킹)
    pub fn pop(&self) -> Option<QueueEntry> {
        let entry = self.inner.pop();
        if entry.is_some() {
            PipelineMetrics::set_queue_depth(self.inner.len());
        }
        entry
    }

    /// 현재 대기 중인 항목 수
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// 큐가 비어있는지 확인
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 큐 용량
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// 수용된 이벤트 누적 수
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Acquire)
    }

    /// 큐 포화로 드롭된 이벤트 누적 수
    pub fn dropped_total(&self) -> u64 {
        self.dropped_full.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Severity;
    use std::sync::Arc;

    fn entry(message: &str) -> QueueEntry {
        QueueEntry::new(LogEvent::new(Severity::Info, "app", message, &[]), "file")
    }

    #[test]
    fn test_push_and_pop() {
        let queue = EventQueue::new(4);
        assert!(queue.push(entry("one")));
        assert!(queue.push(entry("two")));
        assert_eq!(queue.len(), 2);

        let first = queue.pop().unwrap();
        assert_eq!(first.event.message, "one");
        let second = queue.pop().unwrap();
        assert_eq!(second.event.message, "two");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let queue = EventQueue::new(2);
        assert!(queue.push(entry("one")));
        assert!(queue.push(entry("two")));

        // 세 번째부터는 드롭
        assert!(!queue.push(entry("three")));
        assert!(!queue.push(entry("four")));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.enqueued_total(), 2);
        assert_eq!(queue.dropped_total(), 2);
    }

    #[test]
    fn test_drop_counter_matches_failed_pushes() {
        let queue = EventQueue::new(8);
        let mut failed = 0;
        for i in 0..20 {
            if !queue.push(entry(&format!("msg {}", i))) {
                failed += 1;
            }
        }
        assert_eq!(failed, 12);
        assert_eq!(queue.dropped_total(), 12);
        assert_eq!(queue.enqueued_total(), 8);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(EventQueue::new(1000));
        let mut handles = Vec::new();

        for t in 0..4 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    queue.push(entry(&format!("thread {} msg {}", t, i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        assert_eq!(queue.enqueued_total(), 400);
        assert_eq!(queue.dropped_total(), 0);
    }

    #[test]
    fn test_entry_preserves_event_fields() {
        let event = LogEvent::new(Severity::Error, "app.db", "query {} failed", &["users"]);
        let seq = event.seq;
        let queued = QueueEntry::new(event, "file");

        assert_eq!(queued.event.seq, seq);
        assert_eq!(queued.event.severity, Severity::Error);
        assert_eq!(queued.sink, "file");
        assert_eq!(queued.event.rendered_message(), "query users failed");
    }
}
